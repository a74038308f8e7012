//! Greeter service: one method per calling convention.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{StreamReceiver, StreamSender};
use crate::server::ServerBuilder;
use crate::status::Status;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetManyTimesRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetManyTimesResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LongGreetRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LongGreetResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetEveryoneRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetEveryoneResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetWithDeadlineRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GreetWithDeadlineResponse {
    pub result: String,
}

/// Greeting handlers.
pub struct GreeterService {
    /// Duration of one simulated work unit in `GreetWithDeadline`.
    work_unit: Duration,
}

impl GreeterService {
    pub fn new() -> Self {
        Self {
            work_unit: Duration::from_secs(1),
        }
    }

    /// Override the simulated work-unit duration. Tests use short units.
    pub fn with_work_unit(work_unit: Duration) -> Self {
        Self { work_unit }
    }

    /// Register every greeter method.
    pub fn register(self, builder: ServerBuilder) -> ServerBuilder {
        let work_unit = self.work_unit;

        builder
            .unary("greet.Greet", |req: GreetRequest, _token| async move {
                tracing::info!(name = %req.greeting.first_name, "Greet invoked");
                Ok(GreetResponse {
                    result: format!("Hello {}", req.greeting.first_name),
                })
            })
            .server_streaming(
                "greet.GreetManyTimes",
                |req: GreetManyTimesRequest, mut tx: StreamSender<GreetManyTimesResponse>| async move {
                    tracing::info!(name = %req.greeting.first_name, "GreetManyTimes invoked");
                    for number in 0..10 {
                        tx.send(&GreetManyTimesResponse {
                            result: format!(
                                "Hello {}, greeting number {number}",
                                req.greeting.first_name
                            ),
                        })?;
                    }
                    Ok(())
                },
            )
            .client_streaming(
                "greet.LongGreet",
                |mut rx: StreamReceiver<LongGreetRequest>, _token| async move {
                    tracing::info!("LongGreet invoked");
                    let mut result = String::new();
                    while let Some(req) = rx.recv().await? {
                        result.push_str(&format!("Hello {}! ", req.greeting.first_name));
                    }
                    Ok(LongGreetResponse { result })
                },
            )
            .bidi_streaming(
                "greet.GreetEveryone",
                |mut rx: StreamReceiver<GreetEveryoneRequest>,
                 mut tx: StreamSender<GreetEveryoneResponse>| async move {
                    tracing::info!("GreetEveryone invoked");
                    while let Some(req) = rx.recv().await? {
                        tx.send(&GreetEveryoneResponse {
                            result: format!("Hello {}!", req.greeting.first_name),
                        })?;
                    }
                    Ok(())
                },
            )
            .unary(
                "greet.GreetWithDeadline",
                move |req: GreetWithDeadlineRequest, token| async move {
                    tracing::info!(name = %req.greeting.first_name, "GreetWithDeadline invoked");
                    // three units of simulated work, polling the governor
                    // before each so a fired deadline stops it promptly
                    for _ in 0..3 {
                        if let Err(status) = token.check() {
                            tracing::info!("GreetWithDeadline stopped: {status}");
                            return Err::<GreetWithDeadlineResponse, Status>(status);
                        }
                        tokio::time::sleep(work_unit).await;
                    }
                    Ok(GreetWithDeadlineResponse {
                        result: format!("Hello {}", req.greeting.first_name),
                    })
                },
            )
    }
}

impl Default for GreeterService {
    fn default() -> Self {
        Self::new()
    }
}
