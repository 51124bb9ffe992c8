// src/main.rs

use woom::{cli, logging, run, workflow_dir_hint};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("woom error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    let dir = workflow_dir_hint(&args.global.workflow_cfg);
    let log_dir = dir.is_dir().then_some(dir.as_path());
    logging::init_logging(args.global.log_level, log_dir)?;
    run(args).await
}
