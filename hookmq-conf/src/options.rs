use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone, Default)]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Plugin configuration directory
    #[structopt(name = "plugins-dir", long)]
    pub plugins_dir: Option<String>,
}
