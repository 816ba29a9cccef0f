mod client;
mod config;
mod params;
mod render;

use crate::client::{ApiClient, BodyEncoding, ResponseData};
use crate::config::{Config, Scope, save};
use crate::params::{FileRef, ParamValue, Params, parse_assignment};
use crate::render::{OutputMode, RenderOptions, RenderValue, render};
use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use reqwest::Method;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "baasctl",
    version,
    about = "CLI for a backend-as-a-service REST API"
)]
struct Cli {
    #[arg(long, global = true, help = "Print responses as JSON instead of tables")]
    json: bool,

    #[arg(
        long,
        short = 'v',
        global = true,
        help = "Log requests and print full error chains to stderr"
    )]
    verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "API endpoint override (defaults to https://cloud.example.io/v1)"
    )]
    endpoint: Option<String>,

    #[arg(long, global = true, value_name = "ID", help = "Project ID override")]
    project: Option<String>,

    #[arg(long, global = true, help = "API key override")]
    key: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Accept self-signed TLS certificates from the endpoint"
    )]
    self_signed: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> Config {
        Config {
            endpoint: self.endpoint.clone(),
            project: self.project.clone(),
            key: self.key.clone(),
            self_signed: self.self_signed.then_some(true),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Persist --endpoint/--project/--key/--self-signed to the chosen scope
    Configure {
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
        #[arg(long, help = "Clear the stored settings in this scope first")]
        reset: bool,
    },
    /// Show current configuration (key masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
    /// Service health
    #[command(subcommand)]
    Health(HealthCommand),
    /// User operations
    #[command(subcommand)]
    Users(UsersCommand),
    /// Database operations
    #[command(subcommand)]
    Databases(DatabasesCommand),
    /// Function operations
    #[command(subcommand)]
    Functions(FunctionsCommand),
    /// Storage operations
    #[command(subcommand)]
    Storage(StorageCommand),
    /// Send an arbitrary request
    Call {
        #[arg(value_name = "METHOD")]
        method: String,
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(
            long = "param",
            value_name = "KEY=VALUE",
            help = "Request parameter; prefix the value with @ to upload a file"
        )]
        param: Vec<String>,
        #[arg(long, value_name = "JSON", help = "Parameters as a JSON object")]
        params: Option<String>,
        #[arg(long, help = "Send the body as multipart form data")]
        multipart: bool,
    },
}

#[derive(Subcommand)]
enum HealthCommand {
    /// GET /health
    Get,
}

#[derive(Subcommand)]
enum UsersCommand {
    /// List users
    List {
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Fetch a user by ID
    Get {
        #[arg(value_name = "USER_ID")]
        user_id: String,
    },
    /// Create a user
    Create {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum DatabasesCommand {
    /// List databases
    List {
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a database
    Create {
        #[arg(long)]
        database_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "BOOL")]
        enabled: Option<bool>,
    },
    /// List documents in a collection
    ListDocuments {
        #[arg(value_name = "DATABASE_ID")]
        database_id: String,
        #[arg(value_name = "COLLECTION_ID")]
        collection_id: String,
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
    },
}

#[derive(Subcommand)]
enum FunctionsCommand {
    /// List functions
    List {
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// List executions of a function
    ListExecutions {
        #[arg(value_name = "FUNCTION_ID")]
        function_id: String,
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
    },
    /// Trigger a function execution
    CreateExecution {
        #[arg(value_name = "FUNCTION_ID")]
        function_id: String,
        #[arg(long, help = "Request body passed to the function")]
        body: Option<String>,
        #[arg(long = "async", value_name = "BOOL")]
        asynchronous: Option<bool>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        method: Option<String>,
        #[arg(long, value_name = "JSON", help = "Headers as a JSON object")]
        headers: Option<String>,
    },
}

#[derive(Subcommand)]
enum StorageCommand {
    /// List files in a bucket
    ListFiles {
        #[arg(value_name = "BUCKET_ID")]
        bucket_id: String,
        #[arg(long = "queries", value_name = "QUERY")]
        queries: Vec<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Upload a file to a bucket
    CreateFile {
        #[arg(value_name = "BUCKET_ID")]
        bucket_id: String,
        #[arg(long)]
        file_id: String,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        #[arg(long = "permissions", value_name = "PERMISSION")]
        permissions: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

/// One endpoint call, ready for the transport.
#[derive(Debug)]
struct ApiRequest {
    method: Method,
    path: String,
    params: ParamValue,
    encoding: BodyEncoding,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, params: Params) -> Self {
        Self {
            method,
            path: path.into(),
            params: params.into_value(),
            encoding: BodyEncoding::Auto,
        }
    }

    fn get(path: impl Into<String>, params: Params) -> Self {
        Self::new(Method::GET, path, params)
    }

    fn post(path: impl Into<String>, params: Params) -> Self {
        Self::new(Method::POST, path, params)
    }
}

struct Output {
    mode: OutputMode,
    opts: RenderOptions,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_tracing(verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if verbose {
                eprintln!("Error: {err:?}");
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("baasctl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let overrides = cli.overrides();

    match &cli.command {
        Commands::Configure { scope, reset } => {
            let existing = if *reset {
                Config::default()
            } else {
                config::load_scope((*scope).into(), &cwd)?
            };
            let updated = config::merge(existing, overrides);
            let path = save((*scope).into(), &updated, &cwd)?;
            println!("Saved configuration to {}", path.display());
            return Ok(());
        }
        Commands::ConfigShow => {
            let merged = config::merge(config::load(&cwd)?, overrides);
            println!("{}", serde_json::to_string_pretty(&config::masked(&merged))?);
            return Ok(());
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            let mut stdout = io::stdout();
            match shell {
                CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin, &mut stdout),
                CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin, &mut stdout),
                CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin, &mut stdout),
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut stdout)
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let request = build_request(&cli.command)?;
    let effective = config::resolve(&cwd, overrides)?;
    let client = ApiClient::new(&effective)?;
    let output = Output {
        mode: OutputMode::from_json_flag(cli.json),
        opts: RenderOptions::detect(),
    };

    let response = client.send(
        request.method,
        &request.path,
        &request.params,
        request.encoding,
    )?;
    render_response(&response, &output)
}

fn build_request(command: &Commands) -> Result<ApiRequest> {
    let request = match command {
        Commands::Health(HealthCommand::Get) => ApiRequest::get("/health", Params::new()),
        Commands::Users(cmd) => match cmd {
            UsersCommand::List { queries, search } => ApiRequest::get(
                "/users",
                Params::new()
                    .set_list("queries", queries.clone())
                    .set_opt("search", search.clone()),
            ),
            UsersCommand::Get { user_id } => {
                ApiRequest::get(format!("/users/{user_id}"), Params::new())
            }
            UsersCommand::Create {
                user_id,
                email,
                password,
                name,
            } => ApiRequest::post(
                "/users",
                Params::new()
                    .set("userId", user_id.as_str())
                    .set_opt("email", email.clone())
                    .set_opt("password", password.clone())
                    .set_opt("name", name.clone()),
            ),
        },
        Commands::Databases(cmd) => match cmd {
            DatabasesCommand::List { queries, search } => ApiRequest::get(
                "/databases",
                Params::new()
                    .set_list("queries", queries.clone())
                    .set_opt("search", search.clone()),
            ),
            DatabasesCommand::Create {
                database_id,
                name,
                enabled,
            } => ApiRequest::post(
                "/databases",
                Params::new()
                    .set("databaseId", database_id.as_str())
                    .set("name", name.as_str())
                    .set_opt("enabled", *enabled),
            ),
            DatabasesCommand::ListDocuments {
                database_id,
                collection_id,
                queries,
            } => ApiRequest::get(
                format!("/databases/{database_id}/collections/{collection_id}/documents"),
                Params::new().set_list("queries", queries.clone()),
            ),
        },
        Commands::Functions(cmd) => match cmd {
            FunctionsCommand::List { queries, search } => ApiRequest::get(
                "/functions",
                Params::new()
                    .set_list("queries", queries.clone())
                    .set_opt("search", search.clone()),
            ),
            FunctionsCommand::ListExecutions {
                function_id,
                queries,
            } => ApiRequest::get(
                format!("/functions/{function_id}/executions"),
                Params::new().set_list("queries", queries.clone()),
            ),
            FunctionsCommand::CreateExecution {
                function_id,
                body,
                asynchronous,
                path,
                method,
                headers,
            } => {
                let headers = headers
                    .as_deref()
                    .map(|raw| parse_json_object(raw, "--headers"))
                    .transpose()?
                    .map(|map| ParamValue::from(serde_json::Value::Object(map)));
                ApiRequest::post(
                    format!("/functions/{function_id}/executions"),
                    Params::new()
                        .set_opt("body", body.clone())
                        .set_opt("async", *asynchronous)
                        .set_opt("path", path.clone())
                        .set_opt("method", method.clone())
                        .set_opt("headers", headers),
                )
            }
        },
        Commands::Storage(cmd) => match cmd {
            StorageCommand::ListFiles {
                bucket_id,
                queries,
                search,
            } => ApiRequest::get(
                format!("/storage/buckets/{bucket_id}/files"),
                Params::new()
                    .set_list("queries", queries.clone())
                    .set_opt("search", search.clone()),
            ),
            StorageCommand::CreateFile {
                bucket_id,
                file_id,
                file,
                permissions,
            } => {
                let mut request = ApiRequest::post(
                    format!("/storage/buckets/{bucket_id}/files"),
                    Params::new()
                        .set("fileId", file_id.as_str())
                        .set("file", FileRef::new(file))
                        .set_list("permissions", permissions.clone()),
                );
                request.encoding = BodyEncoding::Multipart;
                request
            }
        },
        Commands::Call {
            method,
            path,
            param,
            params,
            multipart,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| anyhow!("invalid HTTP method `{method}`"))?;
            let mut built = Params::new();
            if let Some(raw) = params {
                for (key, value) in parse_json_object(raw, "--params")? {
                    built = built.set(&key, ParamValue::from(value));
                }
            }
            for raw in param {
                let (key, value) = parse_assignment(raw)
                    .ok_or_else(|| anyhow!("--param expects KEY=VALUE, got `{raw}`"))?;
                built = built.set(&key, value);
            }
            let mut request = ApiRequest::new(method, path.as_str(), built);
            if *multipart {
                request.encoding = BodyEncoding::Multipart;
            }
            request
        }
        Commands::Configure { .. } | Commands::ConfigShow | Commands::Completion { .. } => {
            bail!("command does not call the API")
        }
    };
    Ok(request)
}

fn parse_json_object(raw: &str, flag: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("parsing {flag} as JSON"))?;
    let serde_json::Value::Object(map) = value else {
        bail!("{flag} must be a JSON object");
    };
    Ok(map)
}

fn render_response(response: &ResponseData, output: &Output) -> Result<()> {
    debug!(status = response.status, "rendering response");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    render(&response.value, output.mode, &output.opts, &mut out)
        .context("rendering response")?;
    out.flush().context("flushing output")?;

    if output.mode == OutputMode::Table && is_empty_response(&response.value) {
        if output.opts.color {
            eprintln!("{}", "✓ Success".green().bold());
        } else {
            eprintln!("✓ Success");
        }
    }
    Ok(())
}

fn is_empty_response(value: &RenderValue) -> bool {
    value.as_record().is_some_and(|record| record.is_empty())
}
