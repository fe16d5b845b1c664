use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context as _, Result, bail},
    ebike_flow_api::ApiClient,
    ebike_flow_config::FlowConfig,
    ebike_flow_oauth::{FileTokenStore, OAuthClient, TokenStore},
    tracing::debug,
};

/// Everything a command needs: configuration, token store and clients for
/// the selected account.
pub struct AppContext {
    pub config: FlowConfig,
    pub store: Arc<FileTokenStore>,
    pub oauth: Arc<OAuthClient>,
    pub api: Arc<ApiClient>,
}

impl AppContext {
    pub fn load(config_path: Option<PathBuf>, account: Option<String>) -> Result<Self> {
        let mut config = ebike_flow_config::load(config_path.as_deref())?;
        if let Some(account) = account {
            config.account = account;
        }

        let token_file = config.token_file()?;
        debug!(account = %config.account, token_file = %token_file.display(), "using token store");
        let store = Arc::new(FileTokenStore::new(token_file));

        let http = reqwest::Client::builder()
            .timeout(config.api.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        let oauth = Arc::new(
            OAuthClient::new(
                config.account.clone(),
                config.oauth.to_oauth_config(),
                Arc::clone(&store) as Arc<dyn TokenStore>,
            )?
            .with_http_client(http.clone())
            .with_skew(config.oauth.expiry_skew()),
        );
        let api = Arc::new(
            ApiClient::new(Arc::clone(&oauth))?
                .with_http_client(http)
                .with_endpoints(config.api.endpoints()),
        );

        Ok(Self {
            config,
            store,
            oauth,
            api,
        })
    }

    /// Bike given on the command line, else the configured one, else the
    /// only bike on the account.
    pub async fn resolve_bike(&self, explicit: Option<String>) -> Result<String> {
        if let Some(id) = explicit.or_else(|| self.config.bike_id.clone()) {
            return Ok(id);
        }
        let bikes = self.api.list_bikes().await?;
        match bikes.as_slice() {
            [] => bail!("no bikes registered on this account"),
            [only] => Ok(only.id.clone()),
            many => {
                let listing: Vec<String> = many
                    .iter()
                    .map(|b| format!("  {}  {}", b.id, b.display_name()))
                    .collect();
                bail!(
                    "account has {} bikes, pick one with --bike or `bike_id` in the config:\n{}",
                    many.len(),
                    listing.join("\n")
                )
            },
        }
    }
}
