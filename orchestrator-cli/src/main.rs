//! Orchestrator CLI: run the HTTP/SSE server, or drive workflows on a
//! running one from a terminal.

mod log_format;
mod logging;

use clap::{Parser, Subcommand};
use orchestrator_cli::{orchestrator_url, OrchestratorClient};

#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Multi-agent orchestration core: serve the API, or drive workflows from a terminal")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/SSE API server (binds `PORT`, default 8080).
    Serve(ServeArgs),
    /// Drive workflows against a running server (`ORCHESTRATOR_URL`).
    Workflow(WorkflowArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen address, overrides `PORT` (default 127.0.0.1:8080).
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

#[derive(clap::Args, Debug)]
struct WorkflowArgs {
    /// Base URL of a running orchestrator-api server.
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    #[command(subcommand)]
    sub: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
enum WorkflowCommand {
    /// List registered workflow templates.
    Templates,
    /// Create and run a workflow from a template.
    Run {
        template_name: String,
        /// JSON context object (default: `{}`).
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// Fetch a workflow's current persisted state.
    Status { workflow_id: String },
    /// Resume a paused workflow with an approval decision.
    Resume {
        workflow_id: String,
        /// `approved` or `rejected`.
        decision: String,
    },
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    orchestrator_config::load_and_apply("orchestrator", None::<&std::path::Path>).ok();
    logging::init()?;

    let args = Args::parse();

    match args.cmd {
        Command::Serve(serve_args) => {
            if let Err(e) = orchestrator_api::run_serve(serve_args.addr.as_deref()).await {
                eprintln!("serve error: {e}");
                std::process::exit(1);
            }
        }
        Command::Workflow(workflow_args) => {
            let client = OrchestratorClient::new(orchestrator_url(workflow_args.url.as_deref()));
            let result = match workflow_args.sub {
                WorkflowCommand::Templates => client.list_templates().await,
                WorkflowCommand::Run {
                    template_name,
                    context,
                } => {
                    let context: serde_json::Value = serde_json::from_str(&context)
                        .map_err(|e| format!("invalid --context JSON: {e}"))?;
                    client.execute(&template_name, context).await
                }
                WorkflowCommand::Status { workflow_id } => client.status(&workflow_id).await,
                WorkflowCommand::Resume {
                    workflow_id,
                    decision,
                } => client.resume(&workflow_id, &decision).await,
            };
            match result {
                Ok(value) => print_json(&value),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
