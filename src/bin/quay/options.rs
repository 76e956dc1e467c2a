use quay::library::communication::dispatch::{ConsumerOptions, ProducerOptions};
use quay::library::communication::ProviderOptions;
use std::str::FromStr;
use structopt::StructOpt;
use thiserror::Error;

#[derive(Debug, StructOpt)]
#[structopt(about = "Send and receive sample messages through a reliable queue")]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,quay=debug",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Format of log output (text, compact or json)
    #[structopt(
        long,
        global = true,
        default_value = "text",
        env,
        value_name = "format"
    )]
    pub log_format: LogFormat,

    #[structopt(flatten)]
    pub provider: ProviderOptions,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Read lines from stdin and send each of them as a message until "exit" is entered
    Produce(ProducerOptions),
    /// Print received messages using two handlers of different speed until terminated
    Consume(ConsumerOptions),
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

#[derive(Debug, Error)]
#[error("unknown log format '{0}', expected one of: text, compact, json")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(UnknownLogFormat(s.to_owned())),
        }
    }
}
