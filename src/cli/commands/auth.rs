use clap::Subcommand;
use serde_json::json;

use crate::auth::AuthOutcome;
use crate::cli::utils::output_success;
use crate::cli::{Context, OutputFormat};
use crate::types::Role;

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Sign in with email and password")]
    Login {
        #[arg(help = "Email")]
        email: String,
        #[arg(long, help = "Password")]
        password: String,
        #[arg(long, help = "Portal the sign-in is for (admin or user)")]
        role: Option<Role>,
    },

    #[command(about = "Create a user account")]
    Signup {
        #[arg(help = "Email")]
        email: String,
        #[arg(long, help = "Password")]
        password: String,
        #[arg(long, help = "Full name")]
        name: String,
    },

    #[command(about = "Sign out and forget the stored session")]
    Logout,

    #[command(about = "Show current authentication status")]
    Status,

    #[command(about = "Print the Google sign-in URL")]
    Google,

    #[command(about = "Finish a Google sign-in from the callback URL")]
    Callback {
        #[arg(help = "Full URL the browser was redirected to")]
        url: String,
    },

    #[command(about = "Create a confirmed account directly (offline backend only)")]
    Provision {
        #[arg(help = "Email")]
        email: String,
        #[arg(long, help = "Password")]
        password: String,
        #[arg(long, help = "Full name")]
        name: Option<String>,
    },
}

fn report(outcome: AuthOutcome, output_format: &OutputFormat, message: &str) -> anyhow::Result<()> {
    if !outcome.success {
        anyhow::bail!(outcome.error.unwrap_or_else(|| message.to_string()));
    }
    let message = outcome.message.clone().unwrap_or_else(|| message.to_string());
    output_success(output_format, &message, Some(serde_json::to_value(&outcome)?))
}

pub async fn handle(cmd: AuthCommands, ctx: &Context, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuthCommands::Login { email, password, role } => {
            let outcome = ctx.flow.sign_in(&email, &password, role).await;
            let message = format!("Signed in as {}", email);
            report(outcome, &output_format, &message)
        }
        AuthCommands::Signup { email, password, name } => {
            let outcome = ctx.flow.sign_up(&email, &password, &name).await;
            report(outcome, &output_format, &format!("Signed up {}", email))
        }
        AuthCommands::Logout => {
            let outcome = ctx.flow.sign_out().await;
            report(outcome, &output_format, "Signed out")
        }
        AuthCommands::Status => {
            let store = ctx.store.read().await;
            let snapshot = store.snapshot();
            let message = if snapshot.authenticated {
                format!(
                    "Signed in as {} ({})",
                    snapshot.email,
                    snapshot.role.map(|r| r.as_str()).unwrap_or("unknown")
                )
            } else {
                "Not signed in".to_string()
            };
            let details = json!({
                "status": snapshot,
                "profile_complete": store.is_profile_complete(),
            });
            output_success(&output_format, &message, Some(details))
        }
        AuthCommands::Google => {
            let outcome = ctx.flow.sign_in_with_google().await;
            if let (OutputFormat::Text, Some(url)) = (&output_format, outcome.url.as_deref()) {
                println!("{}", url);
            }
            report(outcome, &output_format, "Open the URL above to continue with Google")
        }
        AuthCommands::Callback { url } => {
            let outcome = ctx.flow.complete_oauth_redirect(&url).await;
            report(outcome, &output_format, "Signed in with Google")
        }
        AuthCommands::Provision { email, password, name } => {
            let Some(memory) = ctx.offline() else {
                anyhow::bail!("provision is only available with --offline");
            };
            let metadata = match name {
                Some(name) => json!({ "full_name": name }),
                None => json!({}),
            };
            let user = memory.register_account(&email, &password, metadata);
            output_success(
                &output_format,
                &format!("Provisioned {}", user.email_or_empty()),
                Some(json!({ "user_id": user.id })),
            )
        }
    }
}
