//! Send verification codes to user mailboxes.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mail templates list.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Carry the code confirming a new address.
    SignupCode,
    /// Carry the code starting a password reset.
    RecoveryCode,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    template: Template,
    code: Cow<'a, str>,
}

/// Mailer instance manager.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| ServerError::InvalidScheme)?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("keygate_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.keygate.email",
            source: "com.keygate.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Deliver a verification code to an address.
    ///
    /// Never fails: a delivery problem is logged and reported as `false`
    /// so flows stay resumable via a resend.
    pub async fn send(&self, to: &str, template: Template, code: &str) -> bool {
        match self.publish(to, template, code).await {
            Ok(delivered) => delivered,
            Err(err) => {
                tracing::warn!(?template, error = %err, "mail event not published");
                false
            },
        }
    }

    async fn publish(
        &self,
        to: &str,
        template: Template,
        code: &str,
    ) -> Result<bool> {
        let Some(conn) = &self.conn else {
            tracing::debug!(?template, "no mail transport configured");
            return Ok(false);
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let content = Content {
            to: Cow::from(to),
            template,
            code: Cow::from(code),
        };
        let payload = Self::create_event(content);
        let payload = serde_json::to_string(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(?template, "event sent");

        Ok(true)
    }
}
