use anyhow::{anyhow, Result};
use demo::{SampleConsumerService, SampleMessage};
use options::{Command, LogFormat};
use quay::harness::{Heart, HostTerminationReason, ServiceHost};
use quay::library::communication::dispatch::{Producer, ProducerOptions};
use quay::library::communication::event::QueueProvider;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod demo;
mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("quay {}", env!("CARGO_PKG_VERSION"));

    let provider = options.provider.build()?;

    match options.command {
        Command::Produce(producer_options) => produce(provider, producer_options).await,
        Command::Consume(consumer_options) => {
            let (heart, _stone) = Heart::new();

            let reason = ServiceHost::new(std::env::args().collect())
                .add(SampleConsumerService::new(provider, consumer_options))
                .run(heart)
                .await;

            match reason {
                HostTerminationReason::HeartDied(death_reason) => {
                    info!(%death_reason, "Shut down");
                    Ok(())
                }
                reason => Err(reason.into()),
            }
        }
    }
}

async fn produce(provider: Arc<dyn QueueProvider>, options: ProducerOptions) -> Result<()> {
    let producer = Producer::new(provider, options);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Enter one message per line, 'exit' to quit");

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();

        if text.eq_ignore_ascii_case("exit") {
            break;
        }

        if text.is_empty() {
            continue;
        }

        producer
            .send(&SampleMessage {
                text: text.to_owned(),
            })
            .await
            .map_err(|e| anyhow!(e))?;
    }

    Ok(())
}
