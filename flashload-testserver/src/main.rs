use std::net::SocketAddr;
use std::num::NonZeroU64;

use tokio::net::TcpListener;
use tokio::time::Duration;

use flashload_testserver::{TestServerOptions, TestServerStats};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut opts = TestServerOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:0")
                })?;
                bind_addr = addr.parse()?;
            }
            "--stock" => {
                let stock = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--stock requires a number"))?;
                opts = opts.with_stock(12, stock.parse()?);
            }
            "--latency-ms" => {
                let ms = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--latency-ms requires a number"))?;
                opts.latency = Duration::from_millis(ms.parse()?);
            }
            "--fail-every" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--fail-every requires a number"))?;
                opts.fail_every = Some(n.parse::<NonZeroU64>()?);
            }
            "-h" | "--help" => {
                eprintln!(
                    "flashload-testserver\n\nUSAGE:\n  flashload-testserver [--bind 127.0.0.1:0] [--stock N] [--latency-ms MS] [--fail-every N]\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = flashload_testserver::router(opts, TestServerStats::default());

    println!("HTTP_URL=http://{addr}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
    });

    serve.await?;
    Ok(())
}
