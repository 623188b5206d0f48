use build_agent::cli::{AgentCliConfig, Cli, CliCommand, CliError};
use build_agent::config::AgentConfig;
use build_agent::group::{GroupExecutor, ScriptLayout};
use build_agent::http::{ApiClient, JobApi, ReqwestHttpClient};
use build_agent::status::{StatusCode, SystemCodes};
use build_agent::supervisor::{ExecutionSupervisor, HandoffMarkers};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli_config = match Cli::init() {
        Ok(cli_config) => cli_config,
        Err(err) => {
            // logging may not be initialized yet
            eprintln!("Failed to start the build agent: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli_config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the requested command, returning whether it succeeded.
async fn run(cli_config: AgentCliConfig) -> Result<bool, CliError> {
    let AgentCliConfig { config, command } = cli_config;

    let http_client = ReqwestHttpClient::try_new(&config.http_config())?;
    let api = Arc::new(ApiClient::new(
        http_client,
        config.api.url.as_str(),
        config.api.token.as_str(),
    ));

    info!("Loading system codes");
    let codes = SystemCodes::try_from_remote(api.get_system_codes().await?)?;
    let supervisor = build_supervisor(&config, api.clone(), codes.clone());

    match command {
        CliCommand::Group(args) => {
            let layout = ScriptLayout::new(config.steps_dir(), config.roster_path())
                .with_kill_script(config.kill_script.clone());
            let executor = GroupExecutor::new(
                api,
                supervisor,
                layout,
                codes,
                config.node_id()?,
                config.pipelines_dir(),
            );
            let summary = executor.execute(&args.into()).await?;
            info!(
                steps = summary.steps.len(),
                units = summary.units.len(),
                "Affinity group finished"
            );
            Ok(true)
        }
        CliCommand::Unit(args) => {
            let result = supervisor.execute(&args.request(&config)).await?;
            info!(status = %result.status(), exit_code = ?result.exit_code(), "Unit finished");
            Ok(result.status() == StatusCode::Success)
        }
    }
}

fn build_supervisor(
    config: &AgentConfig,
    api: Arc<ApiClient<ReqwestHttpClient>>,
    codes: SystemCodes,
) -> ExecutionSupervisor<ApiClient<ReqwestHttpClient>> {
    ExecutionSupervisor::new(
        api.clone(),
        api,
        codes,
        config.supervisor_settings(),
        HandoffMarkers::new(config.markers_dir()),
    )
}
