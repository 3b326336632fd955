//! Throughput of the fleet runner across batch sizes, against a pool of
//! local echo servers standing in for real devices.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fleetctl::error::LaunchFailure;
use fleetctl::launch::{launch, LaunchOptions};
use fleetctl::{Config, Param};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

const SERVERS: usize = 8;
const ADDRESSES: usize = 400;

async fn spawn_echo_version() -> (String, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let mut bytes = serde_json::to_vec(&json!({
                    "STATUS": [{"STATUS": "S", "Code": 22}],
                    "id": 1,
                    "VERSION": [{"API": "3.7"}],
                }))
                .unwrap();
                bytes.push(0);
                let _ = sock.write_all(&bytes).await;
            });
        }
    });
    (addr.ip().to_string(), addr.port())
}

fn bench_launch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addresses = rt.block_on(async {
        let mut servers = Vec::with_capacity(SERVERS);
        for _ in 0..SERVERS {
            servers.push(spawn_echo_version().await);
        }
        (0..ADDRESSES)
            .map(|i| servers[i % SERVERS].clone())
            .collect::<Vec<_>>()
    });

    let mut group = c.benchmark_group("launch_batch_size");
    for batch in [0, 25, 50, 100, 400] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| {
                let addresses = addresses.clone();
                async move {
                    let config = Config::for_tests();
                    launch(
                        &addresses,
                        move |host, port| {
                            let config = config.clone();
                            async move {
                                fleetctl::rexec(&host, port, "version", Param::none(), &config)
                                    .await
                                    .map_err(|e| {
                                        LaunchFailure::from_connection_error((host, port), &e)
                                    })
                            }
                        },
                        LaunchOptions {
                            batch: if batch == 0 { None } else { Some(batch) },
                            progress: None::<fn(usize)>,
                            cancel: None,
                        },
                    )
                    .await
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_launch);
criterion_main!(benches);
