//! WAVE Setup CLI - provision experiments on the WAVE backend.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wave_client::HttpBackend;
use wave_core::schema::rules_text;
use wave_core::{
    build_access_url, generate_test_identifiers, reconcile, reconcile_batch, DataTable,
    ExperimentId, ExperimentTypeSpec, ParticipantId, ReconciliationDecision, RemoteResource,
    TagSpec,
};
use wave_setup::preview::{DEFAULT_PREVIEW_PORT, DEFAULT_PREVIEW_ROOT, DEFAULT_WARM_UP};
use wave_setup::prompt;
use wave_setup::{start_preview_server, Config, PreviewOptions, ProvisionError, Provisioner, Role};

/// WAVE Setup - provision experiment types, tags and experiments
#[derive(Parser)]
#[command(name = "wave-setup")]
#[command(about = "Provision WAVE experiments and preview them locally", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// WAVE backend base URL
    #[arg(long, env = "WAVE_BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Researcher API key
    #[arg(long, env = "RESEARCHER_API_KEY", hide_env_values = true, global = true)]
    researcher_api_key: Option<String>,

    /// Admin API key
    #[arg(long, env = "ADMIN_API_KEY", hide_env_values = true, global = true)]
    admin_api_key: Option<String>,

    /// Experimentee API key embedded in participant URLs
    #[arg(long, env = "EXPERIMENTEE_API_KEY", hide_env_values = true, global = true)]
    experimentee_api_key: Option<String>,

    /// Which key authenticates backend calls
    #[arg(long, value_enum, default_value_t = Role::Researcher, global = true)]
    role: Role,
}

impl ConnectionArgs {
    fn into_config(self) -> Config {
        Config {
            backend_url: self.backend_url,
            role: self.role,
            researcher_api_key: self.researcher_api_key,
            admin_api_key: self.admin_api_key,
            experimentee_api_key: self.experimentee_api_key,
        }
    }
}

#[derive(Args)]
struct PreviewArgs {
    /// Directory to serve
    #[arg(long, default_value = DEFAULT_PREVIEW_ROOT)]
    root: PathBuf,

    /// Port to serve on
    #[arg(long, default_value_t = DEFAULT_PREVIEW_PORT)]
    port: u16,

    /// Do not open the system browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DataFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable
    Check,

    /// List experiment types
    Types,

    /// List tags
    Tags,

    /// Create an experiment type unless one with the same name exists
    #[command(name = "ensure-type")]
    EnsureType {
        /// JSON file with name, table_name, description and schema_definition
        #[arg(long)]
        spec: PathBuf,

        /// Create without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Create the tags that do not exist yet
    #[command(name = "ensure-tags")]
    EnsureTags {
        /// JSON file with an array of {name, description}
        #[arg(long)]
        tags: PathBuf,

        /// Create without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Create an experiment instance
    #[command(name = "create-experiment")]
    CreateExperiment {
        /// Experiment type ID
        #[arg(long)]
        type_id: i64,

        /// Experiment description
        #[arg(long)]
        description: String,

        /// Tag names (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Additional data as a JSON object
        #[arg(long)]
        extra: Option<String>,
    },

    /// Build a participant access URL
    #[command(name = "access-url")]
    AccessUrl {
        /// Where the experiment is hosted
        #[arg(long)]
        base_url: String,

        /// Experiment UUID
        #[arg(long)]
        experiment_id: String,

        /// Participant ID
        #[arg(long)]
        participant_id: String,

        /// Also print the URL including the key
        #[arg(long)]
        show_secret: bool,
    },

    /// Download the data logged for an experiment
    Data {
        /// Experiment UUID
        #[arg(long)]
        experiment_id: String,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: DataFormat,
    },

    /// Serve an experiment directory locally
    Preview {
        #[command(flatten)]
        preview: PreviewArgs,
    },

    /// Print the schema validation rules
    #[command(name = "schema-info")]
    SchemaInfo,

    /// Guided setup: experiment type, tags, test experiment and participant URL
    Setup {
        /// Experiment type definition (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Tags file (JSON)
        #[arg(long)]
        tags: Option<PathBuf>,

        /// Where the experiment is hosted; defaults to the preview URL
        #[arg(long)]
        base_url: Option<String>,

        /// Serve the experiment locally after setup
        #[arg(long)]
        preview: bool,

        #[command(flatten)]
        preview_args: PreviewArgs,

        /// Also print the participant URL including the key
        #[arg(long)]
        show_secret: bool,

        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout is reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wave_setup=info,wave_client=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.connection.into_config();

    match cli.command {
        Commands::SchemaInfo => {
            print!("{}", rules_text());
        }
        Commands::AccessUrl {
            base_url,
            experiment_id,
            participant_id,
            show_secret,
        } => {
            let url = build_access_url(
                &base_url,
                &ExperimentId::new(experiment_id),
                &ParticipantId::new(participant_id),
                config.experimentee_api_key(),
            )?;
            println!("{}", url.redacted());
            if show_secret {
                println!("{}", url.full());
            }
        }
        Commands::Preview { preview } => {
            run_preview(&preview).await?;
        }
        Commands::Check => {
            let backend = config.connect()?;
            if backend.health().await? {
                println!("Backend healthy: {}", backend.base_url());
            } else {
                return Err(format!("backend at {} is not healthy", backend.base_url()).into());
            }
        }
        Commands::Types => {
            let provisioner = Provisioner::new(config.connect()?);
            print_experiment_types(&provisioner.experiment_types().await?);
        }
        Commands::Tags => {
            let provisioner = Provisioner::new(config.connect()?);
            print_tags(&provisioner.tags().await?);
        }
        Commands::EnsureType { spec, yes } => {
            let provisioner = Provisioner::new(config.connect()?);
            let spec: ExperimentTypeSpec = read_json_file(&spec)?;
            ensure_type(&provisioner, &spec, yes).await?;
        }
        Commands::EnsureTags { tags, yes } => {
            let provisioner = Provisioner::new(config.connect()?);
            let tags: Vec<TagSpec> = read_json_file(&tags)?;
            ensure_tags(&provisioner, &tags, yes).await?;
        }
        Commands::CreateExperiment {
            type_id,
            description,
            tags,
            extra,
        } => {
            let provisioner = Provisioner::new(config.connect()?);
            let extra = extra.as_deref().map(parse_object).transpose()?;
            let experiment = provisioner
                .create_experiment(type_id, &description, &tags, extra)
                .await?;
            println!("Experiment created:");
            println!("  UUID:        {}", experiment.uuid);
            println!("  Description: {}", experiment.description);
            println!("  Tags:        {}", experiment.tags.join(", "));
        }
        Commands::Data {
            experiment_id,
            format,
        } => {
            let provisioner = Provisioner::new(config.connect()?);
            let table = provisioner
                .fetch_experiment_data(&ExperimentId::new(experiment_id))
                .await?;
            print_data(&table, format)?;
        }
        Commands::Setup {
            spec,
            tags,
            base_url,
            preview,
            preview_args,
            show_secret,
            yes,
        } => {
            let spec: ExperimentTypeSpec = read_json_file(&spec)?;
            let tags: Vec<TagSpec> = match tags {
                Some(path) => read_json_file(&path)?,
                None => Vec::new(),
            };
            let setup = SetupPlan {
                spec,
                tags,
                base_url,
                preview: preview.then_some(preview_args),
                show_secret,
                yes,
            };
            run_setup(&config, setup).await?;
        }
    }

    Ok(())
}

struct SetupPlan {
    spec: ExperimentTypeSpec,
    tags: Vec<TagSpec>,
    base_url: Option<String>,
    preview: Option<PreviewArgs>,
    show_secret: bool,
    yes: bool,
}

async fn run_setup(config: &Config, plan: SetupPlan) -> Result<(), Box<dyn std::error::Error>> {
    // Fail before touching the backend if no participant URL can be built.
    let experimentee_key = config
        .experimentee_api_key()
        .ok_or(wave_core::CoreError::MissingCredential)?;

    let backend = config.connect()?;
    if !backend.health().await? {
        return Err(format!("backend at {} is not healthy", backend.base_url()).into());
    }
    let provisioner = Provisioner::new(backend);

    let ensured = ensure_type(&provisioner, &plan.spec, plan.yes).await?;
    if !plan.tags.is_empty() {
        ensure_tags(&provisioner, &plan.tags, plan.yes).await?;
    }

    let ids = generate_test_identifiers(&plan.spec.name);
    let tag_names: Vec<String> = plan.tags.iter().map(|t| t.name.clone()).collect();
    prompt::require(
        &format!("Create test experiment '{}'?", ids.test_name),
        plan.yes,
        "no test experiment created",
    )?;
    let experiment = provisioner
        .create_experiment(ensured.id, &ids.test_name, &tag_names, None)
        .await?;
    println!("Test experiment: {} ({})", ids.test_name, experiment.uuid);

    let port = plan
        .preview
        .as_ref()
        .map_or(DEFAULT_PREVIEW_PORT, |p| p.port);
    let base_url = plan
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}/", port));
    let url = build_access_url(
        &base_url,
        &experiment.uuid,
        &ids.participant_id,
        Some(experimentee_key),
    )?;
    println!("Participant URL: {}", url.redacted());
    if plan.show_secret {
        println!("Participant URL (with key): {}", url.full());
    }
    info!(url = %url.redacted(), participant = %ids.participant_id, "Setup complete");

    if let Some(preview) = &plan.preview {
        run_preview(preview).await?;
    }
    Ok(())
}

async fn ensure_type(
    provisioner: &Provisioner<HttpBackend>,
    spec: &ExperimentTypeSpec,
    yes: bool,
) -> Result<wave_setup::EnsuredResource, Box<dyn std::error::Error>> {
    let existing = provisioner.experiment_types().await?;
    print_experiment_types(&existing);

    if let ReconciliationDecision::Create = reconcile(&spec.descriptor()?, &existing) {
        println!(
            "Experiment type '{}' (table '{}') is available.",
            spec.name, spec.table_name
        );
        prompt::require(
            &format!("Create experiment type '{}'?", spec.name),
            yes,
            "experiment type not created",
        )?;
    }

    match provisioner.ensure_experiment_type(spec).await {
        Ok(ensured) if ensured.created => {
            println!("Created experiment type '{}' [ID: {}]", spec.name, ensured.id);
            Ok(ensured)
        }
        Ok(ensured) => {
            println!(
                "Experiment type '{}' already exists; using ID {}",
                spec.name, ensured.id
            );
            if ensured.schema_drift {
                println!("  Note: its schema differs from the one in the experiment type file.");
            }
            Ok(ensured)
        }
        Err(e @ ProvisionError::ResourceConflict { .. }) => {
            eprintln!("Modify 'table_name' in the experiment type file and re-run.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_tags(
    provisioner: &Provisioner<HttpBackend>,
    tags: &[TagSpec],
    yes: bool,
) -> Result<Vec<RemoteResource>, Box<dyn std::error::Error>> {
    let missing = reconcile_batch(tags, &provisioner.tags().await?);
    if missing.is_empty() {
        println!("All {} tag(s) already exist.", tags.len());
        return Ok(Vec::new());
    }

    let names: Vec<&str> = missing.iter().map(|t| t.name.as_str()).collect();
    println!("Tags to create: {}", names.join(", "));
    prompt::require("Create these tags?", yes, "tags not created")?;

    match provisioner.ensure_tags(tags).await {
        Ok(created) => {
            print_created_tags(&created);
            Ok(created)
        }
        Err(e) => {
            if let ProvisionError::PartialBatchFailure { created, .. } = &e {
                print_created_tags(created);
            }
            Err(e.into())
        }
    }
}

fn print_created_tags(created: &[RemoteResource]) {
    for tag in created {
        println!("  Created tag: {} [ID: {}]", tag.name, tag.id);
    }
}

async fn run_preview(args: &PreviewArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = PreviewOptions {
        warm_up: DEFAULT_WARM_UP,
        open_browser: !args.no_browser,
    };
    let mut server = start_preview_server(&args.root, args.port, &options).await?;
    println!(
        "Serving {} at {} (Ctrl-C to stop)",
        server.root().display(),
        server.url()
    );

    let ended = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            None
        }
        state = server.closed() => Some(state),
    };
    if let Some(state) = ended {
        return Err(format!("preview server ended: {:?}", state).into());
    }

    let state = server.stop().await;
    println!("Preview server {:?}", state);
    Ok(())
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse '{}': {}", path.display(), e))?;
    Ok(value)
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err("--extra must be a JSON object".into()),
    }
}

fn print_experiment_types(types: &[RemoteResource]) {
    println!("Experiment types ({}):", types.len());
    println!("{:<8}  {:<32}  {}", "ID", "NAME", "TABLE");
    println!("{}", "-".repeat(72));
    for t in types {
        println!(
            "{:<8}  {:<32}  {}",
            t.id,
            t.name,
            t.uniqueness_key.as_deref().unwrap_or("-")
        );
    }
}

fn print_tags(tags: &[RemoteResource]) {
    println!("Tags ({}):", tags.len());
    println!("{:<8}  {:<24}  {}", "ID", "NAME", "DESCRIPTION");
    println!("{}", "-".repeat(72));
    for tag in tags {
        let description = tag
            .field("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        println!("{:<8}  {:<24}  {}", tag.id, tag.name, description);
    }
}

fn print_data(table: &DataTable, format: DataFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        DataFormat::Json => {
            println!("{}", serde_json::to_string_pretty(table.rows())?);
        }
        DataFormat::Table => {
            println!("{}", table.columns().join("\t"));
            for row in table.rows() {
                let cells: Vec<String> = table
                    .columns()
                    .iter()
                    .map(|c| match row.get(c) {
                        None | Some(Value::Null) => String::new(),
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    })
                    .collect();
                println!("{}", cells.join("\t"));
            }
            eprintln!("{} row(s)", table.len());
        }
    }
    Ok(())
}
