use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use restaurant_console::backend::AuthBackend;
use restaurant_console::retry::RetryPolicy;
use restaurant_console::storage::FileStorage;
use restaurant_console::{
    AuthError, Authenticator, ConfigError, Credentials, HttpBackend, LoginRequest, LoginScreen, Navigator,
    RouteDecision, RouteGuard, SessionConfig, SessionStore,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}: {}", .0.error_code(), .0)]
    Auth(#[from] AuthError),
    #[error("not logged in; run `restaurant-console login` first")]
    NotLoggedIn,
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "restaurant-console", about = "Restaurant console session CLI")]
struct Cli {
    /// Overrides `CONSOLE_API_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides `CONSOLE_STATE_DIR`.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a captcha challenge and print its session id and image reference.
    Captcha,
    /// Log in. Without --captcha/--session-id, fetches a challenge and prompts for the answer.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "CONSOLE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, requires = "session_id")]
        captcha: Option<String>,
        #[arg(long, requires = "captcha")]
        session_id: Option<String>,
        /// Persist the session across runs.
        #[arg(long, default_value_t = false)]
        remember: bool,
        #[arg(long, env = "CONSOLE_TENANT_TOKEN", hide_env_values = true)]
        tenant_token: Option<String>,
    },
    Logout,
    Refresh,
    Whoami {
        /// Ask the backend instead of printing the cached identity.
        #[arg(long, default_value_t = false)]
        remote: bool,
    },
    /// Show what the route guard does with PATH.
    Route { path: String },
    /// Keep the stored session refreshed until interrupted or the session ends.
    Keepalive,
}

struct Context {
    config: SessionConfig,
    backend: Arc<HttpBackend>,
    store: Arc<SessionStore>,
    auth: Arc<Authenticator>,
}

impl Context {
    fn build(config: SessionConfig) -> Result<Self, CliError> {
        let backend = Arc::new(HttpBackend::from_config(&config)?);
        let store = Arc::new(SessionStore::rehydrate(Arc::new(FileStorage::new(&config.state_dir))));
        let auth = Arc::new(Authenticator::new(backend.clone(), store.clone(), config.token));
        Ok(Self { config, backend, store, auth })
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.api_base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    config.validate()?;
    let ctx = Context::build(config)?;

    match cli.command {
        Command::Captcha => run_captcha(&ctx).await,
        Command::Login { username, password, captcha, session_id, remember, tenant_token } => {
            let credentials = Credentials {
                username,
                password,
                captcha_answer: captcha.unwrap_or_default(),
                remember,
                tenant_token,
            };
            run_login(&ctx, credentials, session_id).await
        }
        Command::Logout => {
            ctx.auth.logout().await;
            println!("logged out");
            Ok(())
        }
        Command::Refresh => {
            let session = ctx.auth.refresh().await?;
            println!("token refreshed for {}", session.user.username);
            Ok(())
        }
        Command::Whoami { remote } => run_whoami(&ctx, remote).await,
        Command::Route { path } => {
            run_route(&ctx, &path);
            Ok(())
        }
        Command::Keepalive => run_keepalive(&ctx).await,
    }
}

async fn run_captcha(ctx: &Context) -> Result<(), CliError> {
    let challenge = ctx.backend.request_challenge().await?;
    println!("session id: {}", challenge.session_id);
    println!("image: {}", challenge.image);
    Ok(())
}

async fn run_login(ctx: &Context, credentials: Credentials, session_id: Option<String>) -> Result<(), CliError> {
    let remember = credentials.remember;
    let session = if let Some(session_id) = session_id {
        let mut request =
            LoginRequest::new(credentials.username, credentials.password, credentials.captcha_answer, session_id)
                .remember(remember);
        if let Some(tenant) = credentials.tenant_token {
            request = request.tenant_token(tenant);
        }
        ctx.auth.login(&request).await?
    } else {
        let screen = LoginScreen::new(ctx.auth.clone(), ctx.config.captcha_ttl, RetryPolicy::new(ctx.config.retry));
        let challenge = screen.load_challenge().await?;
        println!("captcha session: {}", challenge.session_id);
        println!("captcha image: {}", challenge.image);
        let answer = prompt("captcha answer: ").await?;
        screen.submit(Credentials { captcha_answer: answer, ..credentials }).await?
    };

    println!("logged in as {} ({})", session.user.username, session.user.role);
    if !remember {
        warn!("session is run-scoped and ends with this process; pass --remember to keep it");
    }
    Ok(())
}

async fn run_whoami(ctx: &Context, remote: bool) -> Result<(), CliError> {
    let identity = if remote {
        ctx.auth.fetch_identity().await?
    } else {
        ctx.auth.current_identity().ok_or(CliError::NotLoggedIn)?
    };
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

fn run_route(ctx: &Context, path: &str) {
    let guard = RouteGuard::from_config(&ctx.config);
    let role = ctx.store.identity().map(|identity| identity.role);
    match guard.decide(path, role.is_some()) {
        RouteDecision::Allow => println!("allow {path}"),
        RouteDecision::RedirectToLogin => println!("redirect {}", guard.login_path()),
        RouteDecision::RedirectToLanding => println!("redirect {}", guard.landing_for(role.as_deref())),
    }
}

async fn run_keepalive(ctx: &Context) -> Result<(), CliError> {
    if !ctx.store.is_authenticated() {
        return Err(CliError::NotLoggedIn);
    }
    let task = ctx.auth.clone().spawn_refresh_task();
    let guard = RouteGuard::from_config(&ctx.config);
    let role = ctx.store.identity().map(|identity| identity.role);
    let landing = guard.landing_for(role.as_deref()).to_string();
    let mut navigator = Navigator::new(guard, ctx.store.subscribe(), &landing);
    info!(path = navigator.current_path(), "keeping session alive; ctrl-c to stop");

    let outcome: Result<(), CliError> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            redirect = navigator.session_changed() => {
                if redirect == Some(RouteDecision::RedirectToLogin) {
                    break Err(AuthError::SessionExpired("session ended during keepalive".into()).into());
                }
            }
        }
    };
    task.abort();
    outcome
}

async fn prompt(label: &str) -> Result<String, CliError> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}
