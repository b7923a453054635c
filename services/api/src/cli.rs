use std::path::PathBuf;
use std::process::ExitCode;

use crate::forms_tool::{run_schema, run_validate};
use crate::server;
use admission_forms::error::AppError;
use admission_forms::forms::ADMISSION_FORM_SLUG;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Admission Forms",
    about = "Serve and inspect the admission form submission service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect form schemas and check payloads offline
    Forms {
        #[command(subcommand)]
        command: FormsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FormsCommand {
    /// Print the public view of a form as JSON
    Schema(SchemaArgs),
    /// Validate a JSON payload against a form and print the result
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct FormSource {
    /// Form slug to look up
    #[arg(long, default_value = ADMISSION_FORM_SLUG)]
    pub(crate) slug: String,
    /// Locale of the form variant
    #[arg(long, default_value = "en")]
    pub(crate) locale: String,
    /// Directory of JSON form schemas; the built-in admission form is used when omitted
    #[arg(long)]
    pub(crate) forms_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct SchemaArgs {
    #[command(flatten)]
    pub(crate) source: FormSource,
}

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    #[command(flatten)]
    pub(crate) source: FormSource,
    /// JSON file holding the submission data, bare or wrapped in `{"data": ...}`
    #[arg(long)]
    pub(crate) data: PathBuf,
    /// Attach a file to a file field, as `fieldKey=PATH` (repeatable)
    #[arg(long = "file", value_name = "KEY=PATH")]
    pub(crate) files: Vec<String>,
}

pub(crate) async fn run() -> Result<ExitCode, AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await.map(|()| ExitCode::SUCCESS),
        Command::Forms {
            command: FormsCommand::Schema(args),
        } => run_schema(args).map(|()| ExitCode::SUCCESS),
        Command::Forms {
            command: FormsCommand::Validate(args),
        } => run_validate(args).map(|valid| {
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }),
    }
}
