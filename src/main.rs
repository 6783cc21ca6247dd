// src/main.rs

use scoutbatch::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(batch_ok) => {
            if !batch_ok {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("scoutbatch error: {err:?}");
            std::process::exit(2);
        }
    }
}

async fn run_main() -> anyhow::Result<bool> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
