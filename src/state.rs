use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore, services::AuthService};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::mail::{Mailer, MemoryMailer, SmtpMailer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let users: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::connect(url).await?),
            None => {
                warn!("DATABASE_URL not set; users are kept in memory");
                Arc::new(MemoryUserStore::new())
            }
        };

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => {
                info!(host = %smtp.host, port = smtp.port, "smtp mailer configured");
                Arc::new(SmtpMailer::new(smtp)?)
            }
            None => {
                warn!("SMTP_HOST not set; outgoing mail is captured in memory");
                Arc::new(MemoryMailer::new())
            }
        };

        Self::from_parts(config, users, mailer, Arc::new(SystemClock))
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let auth = AuthService::new(&config, users, mailer, clock)?;
        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
        })
    }
}
