//! Calculator service: arithmetic over every calling convention.

use serde::{Deserialize, Serialize};

use crate::channel::{StreamReceiver, StreamSender};
use crate::server::ServerBuilder;
use crate::status::Status;

#[derive(Debug, Serialize, Deserialize)]
pub struct SumRequest {
    pub first_number: i64,
    pub second_number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SumResponse {
    pub sum_result: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SquareRootRequest {
    pub number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SquareRootResponse {
    pub number_root: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrimeDecompositionRequest {
    pub number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrimeDecompositionResponse {
    pub prime_factor: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComputeAverageRequest {
    pub number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComputeAverageResponse {
    pub average: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindMaximumRequest {
    pub number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindMaximumResponse {
    pub maximum: i64,
}

/// Calculator handlers.
pub struct CalculatorService;

impl CalculatorService {
    /// Register every calculator method.
    pub fn register(self, builder: ServerBuilder) -> ServerBuilder {
        builder
            .unary("calculator.Sum", |req: SumRequest, _token| async move {
                tracing::info!(a = req.first_number, b = req.second_number, "Sum invoked");
                Ok(SumResponse {
                    sum_result: req.first_number + req.second_number,
                })
            })
            .unary(
                "calculator.SquareRoot",
                |req: SquareRootRequest, _token| async move {
                    tracing::info!(number = req.number, "SquareRoot invoked");
                    if req.number < 0 {
                        return Err(Status::invalid_argument(format!(
                            "received a negative number: {}",
                            req.number
                        )));
                    }
                    Ok(SquareRootResponse {
                        number_root: (req.number as f64).sqrt(),
                    })
                },
            )
            .server_streaming(
                "calculator.PrimeNumberDecomposition",
                |req: PrimeDecompositionRequest,
                 mut tx: StreamSender<PrimeDecompositionResponse>| async move {
                    tracing::info!(number = req.number, "PrimeNumberDecomposition invoked");
                    // trial division, each factor streamed as soon as it is
                    // peeled off
                    let mut remainder = req.number;
                    let mut divisor = 2i64;
                    while remainder > 1 {
                        if remainder % divisor == 0 {
                            tx.send(&PrimeDecompositionResponse {
                                prime_factor: divisor,
                            })?;
                            remainder /= divisor;
                        } else {
                            divisor += 1;
                        }
                    }
                    Ok(())
                },
            )
            .client_streaming(
                "calculator.ComputeAverage",
                |mut rx: StreamReceiver<ComputeAverageRequest>, _token| async move {
                    tracing::info!("ComputeAverage invoked");
                    // accumulate in f64 so arbitrarily long streams cannot
                    // overflow an integer sum
                    let mut sum = 0f64;
                    let mut count = 0u64;
                    while let Some(req) = rx.recv().await? {
                        sum += req.number as f64;
                        count += 1;
                    }
                    if count == 0 {
                        return Err(Status::invalid_argument(
                            "cannot average an empty stream of numbers",
                        ));
                    }
                    Ok(ComputeAverageResponse {
                        average: sum / count as f64,
                    })
                },
            )
            .bidi_streaming(
                "calculator.FindMaximum",
                |mut rx: StreamReceiver<FindMaximumRequest>,
                 mut tx: StreamSender<FindMaximumResponse>| async move {
                    tracing::info!("FindMaximum invoked");
                    // the first value seeds the maximum without emitting;
                    // afterwards only strictly greater values emit, so ties
                    // never re-emit
                    let mut maximum: Option<i64> = None;
                    while let Some(req) = rx.recv().await? {
                        match maximum {
                            Some(current) if req.number <= current => {}
                            Some(_) => {
                                maximum = Some(req.number);
                                tx.send(&FindMaximumResponse {
                                    maximum: req.number,
                                })?;
                            }
                            None => maximum = Some(req.number),
                        }
                    }
                    Ok(())
                },
            )
    }
}
