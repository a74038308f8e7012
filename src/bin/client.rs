//! Demo client: walks every calling convention against the demo server.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use wirecall::services::blog::{
    Blog, CreateBlogRequest, CreateBlogResponse, DeleteBlogRequest, DeleteBlogResponse,
    ListBlogRequest, ListBlogResponse, ReadBlogRequest, ReadBlogResponse, UpdateBlogRequest,
    UpdateBlogResponse,
};
use wirecall::services::calculator::{
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeDecompositionRequest, PrimeDecompositionResponse, SumRequest, SumResponse,
};
use wirecall::services::greeter::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse, Greeting,
    LongGreetRequest, LongGreetResponse,
};
use wirecall::{CallError, CallOptions, Client, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr =
        std::env::var("WIRECALL_ADDR").unwrap_or_else(|_| "127.0.0.1:50051".to_string());
    let client = Client::connect(&addr).await?;
    tracing::info!(%addr, "connected");

    if let Err(e) = run_demos(&client).await {
        tracing::error!("demo failed: {e}");
    }
    Ok(())
}

fn greeting(first: &str, last: &str) -> Greeting {
    Greeting {
        first_name: first.to_string(),
        last_name: last.to_string(),
    }
}

async fn run_demos(client: &Client) -> std::result::Result<(), CallError> {
    // unary
    let resp: GreetResponse = client
        .unary(
            "greet.Greet",
            &GreetRequest {
                greeting: greeting("Priya", "Raghunathan"),
            },
        )
        .await?;
    tracing::info!("Greet: {}", resp.result);

    let resp: SumResponse = client
        .unary(
            "calculator.Sum",
            &SumRequest {
                first_number: 3,
                second_number: 10,
            },
        )
        .await?;
    tracing::info!("Sum: {}", resp.sum_result);

    // server-streaming
    let mut stream = client.server_streaming::<_, GreetManyTimesResponse>(
        "greet.GreetManyTimes",
        &GreetManyTimesRequest {
            greeting: greeting("Priya", "Raghunathan"),
        },
    )?;
    while let Some(resp) = stream.next().await? {
        tracing::info!("GreetManyTimes: {}", resp.result);
    }

    let mut stream = client.server_streaming::<_, PrimeDecompositionResponse>(
        "calculator.PrimeNumberDecomposition",
        &PrimeDecompositionRequest { number: 120 },
    )?;
    while let Some(resp) = stream.next().await? {
        tracing::info!("prime factor: {}", resp.prime_factor);
    }

    // client-streaming
    let mut call = client
        .client_streaming::<LongGreetRequest, LongGreetResponse>("greet.LongGreet")?;
    for name in ["Noor", "Tavish", "Keiko"] {
        call.send(&LongGreetRequest {
            greeting: greeting(name, ""),
        })?;
    }
    let resp = call.finish().await?;
    tracing::info!("LongGreet: {}", resp.result);

    let mut call = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            "calculator.ComputeAverage",
        )?;
    for number in [1, 2, 3, 4] {
        call.send(&ComputeAverageRequest { number })?;
    }
    let resp = call.finish().await?;
    tracing::info!("ComputeAverage: {}", resp.average);

    // bidirectional: send and receive from independent tasks
    let (mut sink, mut stream) = client
        .bidi_streaming::<GreetEveryoneRequest, GreetEveryoneResponse>("greet.GreetEveryone")?;
    let sender = tokio::spawn(async move {
        for name in ["Anouk", "Dmitri", "Wren"] {
            let _ = sink.send(&GreetEveryoneRequest {
                greeting: greeting(name, ""),
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let _ = sink.close_send();
    });
    while let Some(resp) = stream.next().await? {
        tracing::info!("GreetEveryone: {}", resp.result);
    }
    let _ = sender.await;

    let (mut sink, mut stream) = client
        .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>("calculator.FindMaximum")?;
    let sender = tokio::spawn(async move {
        for number in [1, 5, 3, 6, 2, 20] {
            let _ = sink.send(&FindMaximumRequest { number });
        }
        let _ = sink.close_send();
    });
    while let Some(resp) = stream.next().await? {
        tracing::info!("new maximum: {}", resp.maximum);
    }
    let _ = sender.await;

    // deadline: generous first, then one too tight for three seconds of work
    let resp: GreetWithDeadlineResponse = client
        .unary_with(
            "greet.GreetWithDeadline",
            &GreetWithDeadlineRequest {
                greeting: greeting("Priya", "Raghunathan"),
            },
            CallOptions::deadline(Duration::from_secs(5)),
        )
        .await?;
    tracing::info!("GreetWithDeadline (5s): {}", resp.result);

    let hurried: std::result::Result<GreetWithDeadlineResponse, CallError> = client
        .unary_with(
            "greet.GreetWithDeadline",
            &GreetWithDeadlineRequest {
                greeting: greeting("Priya", "Raghunathan"),
            },
            CallOptions::deadline(Duration::from_secs(1)),
        )
        .await;
    match hurried {
        Err(CallError::Status(status)) => {
            tracing::info!("GreetWithDeadline (1s) failed as expected: {status}")
        }
        Err(e) => tracing::error!("unexpected transport failure: {e}"),
        Ok(resp) => tracing::error!("unexpectedly finished in time: {}", resp.result),
    }

    // blog CRUD round trip
    let created: CreateBlogResponse = client
        .unary(
            "blog.CreateBlog",
            &CreateBlogRequest {
                blog: Blog {
                    id: String::new(),
                    author_id: "priya".to_string(),
                    title: "First post".to_string(),
                    content: "Hello from wirecall".to_string(),
                },
            },
        )
        .await?;
    let blog_id = created.blog.id.clone();
    tracing::info!("CreateBlog: {blog_id}");

    let read: ReadBlogResponse = client
        .unary(
            "blog.ReadBlog",
            &ReadBlogRequest {
                blog_id: blog_id.clone(),
            },
        )
        .await?;
    tracing::info!("ReadBlog: {}", read.blog.title);

    let updated: UpdateBlogResponse = client
        .unary(
            "blog.UpdateBlog",
            &UpdateBlogRequest {
                blog: Blog {
                    title: "First post (edited)".to_string(),
                    ..read.blog
                },
            },
        )
        .await?;
    tracing::info!("UpdateBlog: {}", updated.blog.title);

    let mut stream =
        client.server_streaming::<_, ListBlogResponse>("blog.ListBlog", &ListBlogRequest {})?;
    while let Some(resp) = stream.next().await? {
        tracing::info!("ListBlog: {} ({})", resp.blog.title, resp.blog.id);
    }

    let deleted: DeleteBlogResponse = client
        .unary("blog.DeleteBlog", &DeleteBlogRequest { blog_id })
        .await?;
    tracing::info!("DeleteBlog: {}", deleted.blog_id);

    Ok(())
}
