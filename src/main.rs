use std::process::ExitCode;

use clap::Parser;

use strapi_stampede::cli::{self, Cli, RunStatus};
use strapi_stampede::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init(args.verbose);

    match cli::run(args).await {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::Incomplete) => ExitCode::from(2),
        Err(e) => {
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("{}", action);
            }
            ExitCode::FAILURE
        }
    }
}
