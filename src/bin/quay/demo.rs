//! Sample message and services used by the command line interface

use async_trait::async_trait;
use quay::harness::Service;
use quay::library::communication::dispatch::{Consumer, ConsumerOptions};
use quay::library::communication::event::{Message, QueueDescriptor, QueueProvider};
use quay::library::EmptyResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMessage {
    pub text: String,
}

impl Message for SampleMessage {
    fn queue() -> QueueDescriptor {
        QueueDescriptor::new("TestQueue")
    }
}

/// Consumer with two slow handlers and observers printing the outcome
pub struct SampleConsumerService {
    provider: Arc<dyn QueueProvider>,
    options: ConsumerOptions,
    consumer: Option<Consumer<SampleMessage>>,
}

impl SampleConsumerService {
    pub fn new(provider: Arc<dyn QueueProvider>, options: ConsumerOptions) -> Self {
        Self {
            provider,
            options,
            consumer: None,
        }
    }
}

#[async_trait]
impl Service for SampleConsumerService {
    fn name(&self) -> &str {
        "sample-consumer"
    }

    async fn start(&mut self, _args: &[String]) -> EmptyResult {
        let consumer = Consumer::<SampleMessage>::new(self.provider.clone(), self.options.clone())?;

        consumer
            .receive(|context| async move {
                sleep(Duration::from_secs(2)).await;
                println!("[2s handler] {}", context.message().text);
                Ok(())
            })?
            .receive(|context| async move {
                sleep(Duration::from_secs(3)).await;
                println!("[3s handler] {}", context.message().text);
                Ok(())
            })?
            .complete(|context| async move {
                let errors = context.errors();

                if errors.is_empty() {
                    println!("[complete] {}", context.message().text);
                } else {
                    for error in errors {
                        println!("[complete] {} failed: {}", context.message().text, error);
                    }
                }

                Ok(())
            })?
            .on_timeout(|context| async move {
                println!("[timeout] {}", context.message().text);
                Ok(())
            })?;

        self.consumer = Some(consumer);

        Ok(())
    }

    async fn stop(&mut self) -> EmptyResult {
        if let Some(consumer) = self.consumer.take() {
            consumer.dispose().await;
        }

        Ok(())
    }
}
