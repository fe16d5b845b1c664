use {
    anyhow::{Result, bail},
    chrono::Utc,
    clap::Subcommand,
    ebike_flow_oauth::{AuthError, TokenStore, capture_redirect},
    tokio::io::{AsyncBufReadExt, BufReader},
};

use crate::context::AppContext;

const MAX_PASTE_ATTEMPTS: usize = 3;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to the eBike Flow account.
    Login {
        /// Print the login URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Show the stored sessions and their expiry.
    Status,
    /// Forget the stored tokens of the selected account.
    Logout,
}

pub async fn handle_auth(ctx: &AppContext, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login { no_browser } => login(ctx, no_browser).await,
        AuthAction::Status => status(ctx).await,
        AuthAction::Logout => logout(ctx).await,
    }
}

async fn login(ctx: &AppContext, no_browser: bool) -> Result<()> {
    let request = ctx.oauth.begin_authorization()?;

    if no_browser || open::that(&request.url).is_err() {
        println!("Open this URL in a browser and log in:\n\n{}\n", request.url);
    } else {
        println!("Opening browser for authentication...");
    }
    println!(
        "After logging in the browser fails to open the app link. Copy the full\n\
         address from the address bar (it starts with onebikeapp-ios://) and paste it here."
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for attempt in 1..=MAX_PASTE_ATTEMPTS {
        print!("Redirect URL: ");
        std::io::Write::flush(&mut std::io::stdout())?;
        let Some(line) = lines.next_line().await? else {
            bail!("no redirect URL entered");
        };

        let result = match capture_redirect(&line) {
            Ok(result) => result,
            Err(e) if attempt < MAX_PASTE_ATTEMPTS => {
                println!("{e}. Try again.");
                continue;
            },
            Err(e) => return Err(e.into()),
        };

        match ctx
            .oauth
            .complete_authorization(&request.request_id, result)
            .await
        {
            Ok(tokens) => {
                println!(
                    "Logged in as account '{}' (access token valid until {}).",
                    ctx.oauth.account(),
                    tokens.expires_at.format("%Y-%m-%d %H:%M UTC")
                );
                return Ok(());
            },
            Err(AuthError::StateMismatch) if attempt < MAX_PASTE_ATTEMPTS => {
                println!("That URL belongs to a different login attempt. Paste the latest one.");
            },
            Err(AuthError::CodeExpiredOrUsed) => {
                bail!("the authorization code expired or was already used, run `ebike-flow auth login` again")
            },
            Err(e) => return Err(e.into()),
        }
    }
    bail!("giving up after {MAX_PASTE_ATTEMPTS} attempts")
}

async fn status(ctx: &AppContext) -> Result<()> {
    let accounts = ctx.store.accounts().await?;
    if accounts.is_empty() {
        println!("No stored sessions. Run `ebike-flow auth login`.");
        return Ok(());
    }

    let now = Utc::now();
    for account in accounts {
        let Some(tokens) = ctx.store.load(&account).await? else {
            continue;
        };
        let access = if tokens.expires_at > now {
            let remaining = tokens.expires_at - now;
            format!(
                "access valid ({}h {}m remaining)",
                remaining.num_hours(),
                remaining.num_minutes() % 60
            )
        } else {
            "access expired".to_string()
        };
        let refresh = match tokens.refresh_expires_at {
            None => "refresh does not expire".to_string(),
            Some(at) if at > now => format!("refresh valid until {}", at.format("%Y-%m-%d %H:%M UTC")),
            Some(_) => "refresh expired, login required".to_string(),
        };
        let marker = if account == ctx.config.account { "*" } else { " " };
        println!("{marker} {account} [{access}, {refresh}]");
    }
    Ok(())
}

async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.oauth.sign_out().await?;
    println!("Logged out from account '{}'", ctx.oauth.account());
    Ok(())
}
