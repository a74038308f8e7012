//! End-to-end calls over an in-process duplex transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::duplex;

use wirecall::services::blog::{
    Blog, CreateBlogRequest, CreateBlogResponse, DeleteBlogRequest, DeleteBlogResponse,
    ListBlogRequest, ListBlogResponse, ReadBlogRequest, ReadBlogResponse, UpdateBlogRequest,
    UpdateBlogResponse,
};
use wirecall::services::calculator::{
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeDecompositionRequest, PrimeDecompositionResponse, SquareRootRequest, SquareRootResponse,
    SumRequest, SumResponse,
};
use wirecall::services::greeter::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse, Greeting,
    LongGreetRequest, LongGreetResponse,
};
use wirecall::services::{BlogService, CalculatorService, GreeterService};
use wirecall::store::{DocumentId, MemoryCollection};
use wirecall::{CallError, CallOptions, Client, Error, Server, StatusCode};

/// Work unit short enough that deadline tests stay fast.
const WORK_UNIT: Duration = Duration::from_millis(50);

async fn connect() -> (Client, Arc<MemoryCollection>) {
    let (client_io, server_io) = duplex(64 * 1024);

    let blogs = Arc::new(MemoryCollection::new());
    let mut builder = Server::builder();
    builder = GreeterService::with_work_unit(WORK_UNIT).register(builder);
    builder = CalculatorService.register(builder);
    builder = BlogService::new(blogs.clone()).register(builder);
    let server = builder.build();
    server.serve_connection(server_io);

    let client = Client::from_transport(client_io).await.unwrap();
    (client, blogs)
}

fn greeting(first: &str) -> Greeting {
    Greeting {
        first_name: first.to_string(),
        last_name: String::new(),
    }
}

fn status_code(err: &CallError) -> StatusCode {
    err.status().expect("expected a status failure").code()
}

// --- unary ---------------------------------------------------------------

#[tokio::test]
async fn test_unary_greet() {
    let (client, _) = connect().await;
    let resp: GreetResponse = client
        .unary(
            "greet.Greet",
            &GreetRequest {
                greeting: greeting("Mirela"),
            },
        )
        .await
        .unwrap();
    assert_eq!(resp.result, "Hello Mirela");
}

#[tokio::test]
async fn test_unary_sum() {
    let (client, _) = connect().await;
    let resp: SumResponse = client
        .unary(
            "calculator.Sum",
            &SumRequest {
                first_number: 3,
                second_number: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(resp.sum_result, 13);
}

#[tokio::test]
async fn test_unary_square_root_rejects_negative() {
    let (client, _) = connect().await;

    let resp: SquareRootResponse = client
        .unary("calculator.SquareRoot", &SquareRootRequest { number: 16 })
        .await
        .unwrap();
    assert!((resp.number_root - 4.0).abs() < f64::EPSILON);

    let err = client
        .unary::<_, SquareRootResponse>("calculator.SquareRoot", &SquareRootRequest { number: -4 })
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn test_concurrent_calls_share_the_connection() {
    let (client, _) = connect().await;

    // a slow call must not block a fast one issued after it
    let slow_request = GreetWithDeadlineRequest {
        greeting: greeting("Slow"),
    };
    let fast_request = SumRequest {
        first_number: 1,
        second_number: 2,
    };
    let slow =
        client.unary::<_, GreetWithDeadlineResponse>("greet.GreetWithDeadline", &slow_request);
    let fast = client.unary::<_, SumResponse>("calculator.Sum", &fast_request);

    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(fast.unwrap().sum_result, 3);
    assert_eq!(slow.unwrap().result, "Hello Slow");
}

// --- server-streaming ----------------------------------------------------

#[tokio::test]
async fn test_server_streaming_greet_many_times() {
    let (client, _) = connect().await;
    let mut stream = client
        .server_streaming::<_, GreetManyTimesResponse>(
            "greet.GreetManyTimes",
            &GreetManyTimesRequest {
                greeting: greeting("Mirela"),
            },
        )
        .unwrap();

    let mut results = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        results.push(resp.result);
    }
    assert_eq!(results.len(), 10);
    assert_eq!(results[0], "Hello Mirela, greeting number 0");
    assert_eq!(results[9], "Hello Mirela, greeting number 9");
}

#[tokio::test]
async fn test_prime_decomposition_is_ordered_and_multiplies_back() {
    let (client, _) = connect().await;
    let mut stream = client
        .server_streaming::<_, PrimeDecompositionResponse>(
            "calculator.PrimeNumberDecomposition",
            &PrimeDecompositionRequest { number: 120 },
        )
        .unwrap();

    let mut factors = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        factors.push(resp.prime_factor);
    }

    assert_eq!(factors, vec![2, 2, 2, 3, 5]);
    assert_eq!(factors.iter().product::<i64>(), 120);
    let mut sorted = factors.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, factors, "factors must arrive in non-decreasing order");
}

#[tokio::test]
async fn test_prime_decomposition_of_one_is_empty() {
    let (client, _) = connect().await;
    let mut stream = client
        .server_streaming::<_, PrimeDecompositionResponse>(
            "calculator.PrimeNumberDecomposition",
            &PrimeDecompositionRequest { number: 1 },
        )
        .unwrap();

    assert!(stream.next().await.unwrap().is_none());
    // end-of-stream stays sticky
    assert!(stream.next().await.unwrap().is_none());
}

// --- client-streaming ----------------------------------------------------

#[tokio::test]
async fn test_client_streaming_long_greet() {
    let (client, _) = connect().await;
    let mut call = client
        .client_streaming::<LongGreetRequest, LongGreetResponse>("greet.LongGreet")
        .unwrap();

    for name in ["Noor", "Tavish", "Keiko"] {
        call.send(&LongGreetRequest {
            greeting: greeting(name),
        })
        .unwrap();
    }
    let resp = call.finish().await.unwrap();
    assert_eq!(resp.result, "Hello Noor! Hello Tavish! Hello Keiko! ");
}

#[tokio::test]
async fn test_compute_average() {
    let (client, _) = connect().await;
    let mut call = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            "calculator.ComputeAverage",
        )
        .unwrap();

    for number in [1, 2, 3, 4] {
        call.send(&ComputeAverageRequest { number }).unwrap();
    }
    let resp = call.finish().await.unwrap();
    assert!((resp.average - 2.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_compute_average_of_nothing_is_invalid_argument() {
    let (client, _) = connect().await;
    let call = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            "calculator.ComputeAverage",
        )
        .unwrap();

    // finish with zero messages sent
    let err = call.finish().await.unwrap_err();
    assert_eq!(status_code(&err), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn test_compute_average_survives_huge_inputs() {
    let (client, _) = connect().await;
    let mut call = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            "calculator.ComputeAverage",
        )
        .unwrap();

    // two values whose integer sum would exceed i64::MAX
    for _ in 0..2 {
        call.send(&ComputeAverageRequest { number: i64::MAX }).unwrap();
    }
    let resp = call.finish().await.unwrap();
    let expected = i64::MAX as f64;
    assert!((resp.average - expected).abs() <= expected * f64::EPSILON);
}

// --- bidirectional -------------------------------------------------------

#[tokio::test]
async fn test_bidi_greet_everyone() {
    let (client, _) = connect().await;
    let (mut sink, mut stream) = client
        .bidi_streaming::<GreetEveryoneRequest, GreetEveryoneResponse>("greet.GreetEveryone")
        .unwrap();

    let sender = tokio::spawn(async move {
        for name in ["Anouk", "Dmitri", "Wren"] {
            sink.send(&GreetEveryoneRequest {
                greeting: greeting(name),
            })
            .unwrap();
        }
        sink.close_send().unwrap();
    });

    let mut results = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        results.push(resp.result);
    }
    sender.await.unwrap();
    assert_eq!(
        results,
        vec!["Hello Anouk!", "Hello Dmitri!", "Hello Wren!"]
    );
}

#[tokio::test]
async fn test_find_maximum_emits_prefix_maxima() {
    let (client, _) = connect().await;
    let (mut sink, mut stream) = client
        .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>("calculator.FindMaximum")
        .unwrap();

    for number in [1, 5, 3, 6, 2, 20] {
        sink.send(&FindMaximumRequest { number }).unwrap();
    }
    sink.close_send().unwrap();

    let mut maxima = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        maxima.push(resp.maximum);
    }
    // the seed value 1 is never emitted, nor are non-increasing values
    assert_eq!(maxima, vec![5, 6, 20]);
}

#[tokio::test]
async fn test_bidi_send_after_close_is_failed_precondition() {
    let (client, _) = connect().await;
    let (mut sink, mut stream) = client
        .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>("calculator.FindMaximum")
        .unwrap();

    sink.send(&FindMaximumRequest { number: 7 }).unwrap();
    sink.send(&FindMaximumRequest { number: 9 }).unwrap();
    sink.close_send().unwrap();
    sink.close_send().unwrap(); // idempotent

    let err = sink.send(&FindMaximumRequest { number: 11 }).unwrap_err();
    assert_eq!(status_code(&err), StatusCode::FailedPrecondition);

    // the call itself still completes normally
    let mut maxima = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        maxima.push(resp.maximum);
    }
    assert_eq!(maxima, vec![9]);
}

#[tokio::test]
async fn test_live_stream_observes_client_drop() {
    let (client, _) = connect().await;
    let (mut sink, mut stream) = client
        .bidi_streaming::<GreetEveryoneRequest, GreetEveryoneResponse>("greet.GreetEveryone")
        .unwrap();

    drop(client);

    // the surviving handles must fail fast, not hang on a dead connection
    let _ = sink.send(&GreetEveryoneRequest {
        greeting: greeting("Anouk"),
    });
    let _ = sink.close_send();
    let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("stream must resolve promptly once the client is gone");
    let err = next.unwrap_err();
    assert!(matches!(err, CallError::Transport(_)));
}

// --- deadlines and cancellation -------------------------------------------

#[tokio::test]
async fn test_deadline_generous_enough_succeeds() {
    let (client, _) = connect().await;
    // handler needs 3 work units (150ms); give it 10x that
    let resp: GreetWithDeadlineResponse = client
        .unary_with(
            "greet.GreetWithDeadline",
            &GreetWithDeadlineRequest {
                greeting: greeting("Mirela"),
            },
            CallOptions::deadline(WORK_UNIT * 30),
        )
        .await
        .unwrap();
    assert_eq!(resp.result, "Hello Mirela");
}

#[tokio::test]
async fn test_deadline_too_tight_is_deadline_exceeded() {
    let (client, _) = connect().await;
    // one work unit of budget against three units of work
    let err = client
        .unary_with::<_, GreetWithDeadlineResponse>(
            "greet.GreetWithDeadline",
            &GreetWithDeadlineRequest {
                greeting: greeting("Mirela"),
            },
            CallOptions::deadline(WORK_UNIT),
        )
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::DeadlineExceeded);
}

#[tokio::test]
async fn test_cancelling_a_server_stream() {
    let (client, _) = connect().await;
    let mut stream = client
        .server_streaming::<_, GreetManyTimesResponse>(
            "greet.GreetManyTimes",
            &GreetManyTimesRequest {
                greeting: greeting("Mirela"),
            },
        )
        .unwrap();

    assert!(stream.next().await.unwrap().is_some());
    stream.cancel();
    // abandoned: the stream yields nothing further
    assert!(stream.next().await.unwrap().is_none());
}

// --- failure classes -------------------------------------------------------

#[tokio::test]
async fn test_unknown_method_name_never_reaches_the_wire() {
    let (client, _) = connect().await;
    let err = client
        .unary::<_, GreetResponse>(
            "greet.NoSuchMethod",
            &GreetRequest {
                greeting: greeting("Mirela"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::Transport(Error::UnknownMethod(_))
    ));
}

#[tokio::test]
async fn test_calling_with_the_wrong_convention_is_rejected() {
    let (client, _) = connect().await;
    // greet.Greet is unary, not server-streaming
    let result = client.server_streaming::<_, GreetResponse>(
        "greet.Greet",
        &GreetRequest {
            greeting: greeting("Mirela"),
        },
    );
    match result {
        Err(CallError::Transport(Error::Protocol(_))) => {}
        Err(other) => panic!("unexpected error class: {other}"),
        Ok(_) => panic!("mismatched convention must be rejected"),
    }
}

// --- blog -------------------------------------------------------------------

fn sample_blog() -> Blog {
    Blog {
        id: String::new(),
        author_id: "mirela".to_string(),
        title: "First post".to_string(),
        content: "Hello".to_string(),
    }
}

#[tokio::test]
async fn test_blog_crud_round_trip() {
    let (client, _) = connect().await;

    let created: CreateBlogResponse = client
        .unary("blog.CreateBlog", &CreateBlogRequest { blog: sample_blog() })
        .await
        .unwrap();
    let id = created.blog.id.clone();
    assert_eq!(id.len(), 24);

    let read: ReadBlogResponse = client
        .unary("blog.ReadBlog", &ReadBlogRequest { blog_id: id.clone() })
        .await
        .unwrap();
    assert_eq!(read.blog.title, "First post");
    assert_eq!(read.blog.id, id);

    let updated: UpdateBlogResponse = client
        .unary(
            "blog.UpdateBlog",
            &UpdateBlogRequest {
                blog: Blog {
                    title: "Edited".to_string(),
                    ..read.blog
                },
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.blog.title, "Edited");

    let read_again: ReadBlogResponse = client
        .unary("blog.ReadBlog", &ReadBlogRequest { blog_id: id.clone() })
        .await
        .unwrap();
    assert_eq!(read_again.blog.title, "Edited");

    let deleted: DeleteBlogResponse = client
        .unary("blog.DeleteBlog", &DeleteBlogRequest { blog_id: id.clone() })
        .await
        .unwrap();
    assert_eq!(deleted.blog_id, id);

    let err = client
        .unary::<_, ReadBlogResponse>("blog.ReadBlog", &ReadBlogRequest { blog_id: id })
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::NotFound);
}

#[tokio::test]
async fn test_blog_unparsable_id_is_invalid_argument() {
    let (client, _) = connect().await;
    for method in ["blog.ReadBlog", "blog.DeleteBlog"] {
        let err = client
            .unary::<_, ReadBlogResponse>(
                method,
                &ReadBlogRequest {
                    blog_id: "not-a-valid-id".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status_code(&err), StatusCode::InvalidArgument, "{method}");
    }
}

#[tokio::test]
async fn test_blog_miss_is_not_found() {
    let (client, _) = connect().await;
    let absent = DocumentId::generate().to_string();

    let err = client
        .unary::<_, ReadBlogResponse>(
            "blog.ReadBlog",
            &ReadBlogRequest {
                blog_id: absent.clone(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::NotFound);

    let err = client
        .unary::<_, UpdateBlogResponse>(
            "blog.UpdateBlog",
            &UpdateBlogRequest {
                blog: Blog {
                    id: absent.clone(),
                    ..sample_blog()
                },
            },
        )
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::NotFound);

    let err = client
        .unary::<_, DeleteBlogResponse>(
            "blog.DeleteBlog",
            &DeleteBlogRequest { blog_id: absent },
        )
        .await
        .unwrap_err();
    assert_eq!(status_code(&err), StatusCode::NotFound);
}

#[tokio::test]
async fn test_blog_list_streams_every_blog() {
    let (client, _) = connect().await;

    let mut ids = Vec::new();
    for title in ["one", "two", "three"] {
        let created: CreateBlogResponse = client
            .unary(
                "blog.CreateBlog",
                &CreateBlogRequest {
                    blog: Blog {
                        title: title.to_string(),
                        ..sample_blog()
                    },
                },
            )
            .await
            .unwrap();
        ids.push(created.blog.id);
    }

    let mut stream = client
        .server_streaming::<_, ListBlogResponse>("blog.ListBlog", &ListBlogRequest {})
        .unwrap();
    let mut listed = Vec::new();
    while let Some(resp) = stream.next().await.unwrap() {
        listed.push(resp.blog.id);
    }
    assert_eq!(listed.len(), 3);
    for id in ids {
        assert!(listed.contains(&id));
    }
}

#[tokio::test]
async fn test_blog_corrupt_record_mid_list_is_internal() {
    let (client, blogs) = connect().await;

    let _: CreateBlogResponse = client
        .unary("blog.CreateBlog", &CreateBlogRequest { blog: sample_blog() })
        .await
        .unwrap();
    // not valid msgpack for a blog record
    blogs
        .put_raw(DocumentId::generate(), Bytes::from_static(&[0xc1]))
        .await;

    let mut stream = client
        .server_streaming::<_, ListBlogResponse>("blog.ListBlog", &ListBlogRequest {})
        .unwrap();
    let mut outcome = Ok(());
    loop {
        match stream.next().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    assert_eq!(status_code(&outcome.unwrap_err()), StatusCode::Internal);
}
