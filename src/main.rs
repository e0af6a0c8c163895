use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use metapoint_auth::auth::{
    Access, AuthContext, AuthSnapshot, GuardDecision, NavigationModel, RoleResolver, RoleStore,
    RouteGuard, ADMIN_ROLE,
};
use metapoint_auth::config::AppConfig;
use metapoint_auth::integrations::SupabaseClient;
use metapoint_auth::notify::{ConsoleNotifier, Notifier};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Meta Point account and admin-role tool.
#[derive(Parser, Debug)]
#[command(name = "metapoint-auth", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account; a verification email is sent.
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: String,
    },
    /// Sign out and forget the stored session.
    SignOut,
    /// Show the current user and admin status.
    Status {
        /// Print the state as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check whether a user id holds an admin role.
    CheckRole { user_id: String },
    /// Evaluate the route guard for a site path.
    Guard { path: String },
    /// Show the navigation bar for a site path.
    Nav { path: String },
    /// Grant the admin role to a user (admins only).
    GrantAdmin { user_id: String },
    /// Revoke the admin role from a user (admins only).
    RevokeAdmin { user_id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("metapoint_auth=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let client = Arc::new(SupabaseClient::new(
        config.supabase.clone(),
        config.session_file(),
    )?);
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let resolver = RoleResolver::new(client.clone(), config.role_check_timeout());
    let ctx = AuthContext::new(
        client.clone(),
        resolver,
        notifier.clone(),
        config.auth_settings(),
    );
    let _listener = ctx.start().await;

    match cli.command {
        Command::SignIn { email, password } => {
            ctx.sign_in(&email, &password).await?;
            print_status(&ctx.snapshot());
        }
        Command::SignUp {
            email,
            password,
            full_name,
        } => {
            ctx.sign_up(&email, &password, &full_name).await?;
        }
        Command::SignOut => {
            ctx.sign_out().await?;
        }
        Command::Status { json } => {
            if !client.health_check().await {
                tracing::warn!("Supabase auth service is not reachable");
            }
            let snapshot = ctx.wait_until_ready().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
        }
        Command::CheckRole { user_id } => {
            let is_admin = ctx.check_admin_role(&user_id).await;
            println!("{user_id}: {}", if is_admin { "admin" } else { "not admin" });
        }
        Command::Guard { path } => {
            let snapshot = ctx.wait_until_ready().await;
            let decision = RouteGuard::evaluate_path(&snapshot, &path);
            match decision.redirect_target() {
                Some(target) => println!("{path}: redirect to {target}"),
                None => println!("{path}: {}", serde_json::to_string(&decision)?),
            }
        }
        Command::Nav { path } => {
            let snapshot = ctx.wait_until_ready().await;
            let nav = NavigationModel::build(&snapshot, &path);
            println!("{}", serde_json::to_string_pretty(&nav)?);
        }
        Command::GrantAdmin { user_id } => {
            require_admin(&ctx).await?;
            update_role(client.as_ref(), notifier.as_ref(), &user_id, true).await?;
        }
        Command::RevokeAdmin { user_id } => {
            require_admin(&ctx).await?;
            update_role(client.as_ref(), notifier.as_ref(), &user_id, false).await?;
        }
    }

    Ok(())
}

fn print_status(snapshot: &AuthSnapshot) {
    match &snapshot.user {
        Some(user) => {
            let name = user.full_name().unwrap_or("-");
            let email = user.email.as_deref().unwrap_or("-");
            println!("signed in: {email} ({name}) id={}", user.id);
            println!("admin: {}", snapshot.is_admin);
            if let Some(expires) = snapshot.session.as_ref().and_then(|s| s.expires_at_utc()) {
                println!("session expires: {}", expires.to_rfc3339());
            }
        }
        None => println!("signed out"),
    }
}

async fn require_admin(ctx: &AuthContext) -> Result<()> {
    let snapshot = ctx.wait_until_ready().await;
    match RouteGuard::evaluate(&snapshot, Access::Admin) {
        GuardDecision::Allow => Ok(()),
        GuardDecision::RedirectToLogin => bail!("Sign in first"),
        _ => bail!("Admin role required"),
    }
}

async fn update_role(
    store: &dyn RoleStore,
    notifier: &dyn Notifier,
    user_id: &str,
    grant: bool,
) -> Result<()> {
    let result = if grant {
        store.grant_role(user_id, ADMIN_ROLE).await
    } else {
        store.revoke_role(user_id, ADMIN_ROLE).await
    };

    match result {
        Ok(()) => {
            notifier.success("User role updated successfully");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(user_id, "Role update failed: {e}");
            notifier.error("Failed to update user role");
            Err(e.into())
        }
    }
}
