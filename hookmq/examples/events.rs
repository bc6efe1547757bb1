//! Every hook bound, with a few in-process clients exercising them.
//!
//! ```text
//! cargo run -p hookmq --example events -- -f hookmq.toml
//! ```

use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;
use tokio::sync::mpsc;

use hookmq::auth::Allow;
use hookmq::conf::{Options, Settings};
use hookmq::context::ServerContext;
use hookmq::logger::logger_init;
use hookmq::server::MqttServer;
use hookmq::session::Connection;
use hookmq::types::{ConnectInfo, Delivery, Message, QoS};
use hookmq::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::init(Options::from_args())?;
    let _logger = logger_init(&settings.log)?;
    settings.logs();

    let scx = ServerContext::new().settings(settings.clone()).build()?;
    let server = MqttServer::new(scx);
    if server.context().listener_auth("t1").is_none() {
        server.add_listener("t1", Arc::new(Allow))?;
    }

    server
        .events()
        .on_connect(|cl, info| async move {
            log::info!("<< OnConnect client connected {}: {:?}", cl.id(), info);
        })
        .on_disconnect(|cl, err| async move {
            log::info!("<< OnDisconnect client disconnected {}: {:?}", cl.id(), err);
        })
        .on_subscribe(|filter, cl, qos| async move {
            log::info!("<< OnSubscribe client subscribed {}: {} {:?}", cl.id(), filter, qos);
        })
        .on_unsubscribe(|filter, cl| async move {
            log::info!("<< OnUnsubscribe client unsubscribed {}: {}", cl.id(), filter);
        })
        .on_error(|cl, err| async move {
            log::warn!("<< OnError {}: {}", cl.id(), err);
        })
        .on_message(|cl, mut msg| async move {
            if msg.payload.as_ref() == b"hello" {
                msg.payload = "hello world".into();
                log::info!("< OnMessage modified message from client {}: hello world", cl.id());
            } else {
                log::info!(
                    "< OnMessage received message from client {}: {}",
                    cl.id(),
                    String::from_utf8_lossy(&msg.payload)
                );
            }

            //Only a client with the id `allowed-client` receives messages on this topic
            if msg.topic == "a/b/restricted" {
                msg.allow_clients = vec!["allowed-client".into()];
            }

            Ok(msg)
        });

    let allowed = server.connect(ConnectInfo::new("allowed-client", "t1"), b"").await?;
    allowed.subscribe("a/b/restricted", QoS::AtLeastOnce).await?;
    allowed.subscribe("direct/publish", QoS::AtMostOnce).await?;
    let other = server.connect(ConnectInfo::new("other-client", "t1"), b"").await?;
    other.subscribe("a/b/+", QoS::AtMostOnce).await?;

    let (printed_tx, mut printed_rx) = mpsc::unbounded_channel();
    print_deliveries(allowed, printed_tx.clone());
    print_deliveries(other, printed_tx);

    let c1 = server.connect(ConnectInfo::new("c1", "t1"), b"").await?;
    c1.publish(Message::new("a/b/restricted", "hello")).await?;
    c1.publish(Message::new("a/b/open", "hi everyone")).await?;
    c1.subscribe("scratch/#", QoS::AtMostOnce).await?;
    c1.unsubscribe("scratch/#").await?;

    //Direct publishes from the server itself
    let publisher = server.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            match publisher.publish("direct/publish", "scheduled message", false).await {
                Ok(n) => log::info!("> issued direct message to direct/publish, {} receivers", n),
                Err(e) => {
                    log::info!("> direct publish stopped, {}", e);
                    break;
                }
            }
        }
    });

    log::info!("Started!");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((id, d)) = printed_rx.recv() => {
                log::info!("{} received {} on {}", id, String::from_utf8_lossy(&d.payload), d.topic);
            }
        }
    }
    log::info!("Caught Signal");

    c1.disconnect(None).await?;
    server.close().await;
    log::info!("Finished");
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

fn print_deliveries(conn: Connection, printed: mpsc::UnboundedSender<(String, Delivery)>) {
    let (session, mut deliveries) = conn.split();
    tokio::spawn(async move {
        let id = session.client().id().to_string();
        while let Some(d) = deliveries.recv().await {
            if printed.send((id.clone(), d)).is_err() {
                break;
            }
        }
    });
}
