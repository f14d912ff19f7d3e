//! Security alternative selection

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{debug, warn};

use super::env::{CredentialEnv, prefix};
use super::token_cache::{TokenCache, TokenRequest};
use super::CredentialAssignment;
use crate::tool::{ApiKeyLocation, SecurityRequirement, SecurityScheme, ToolDefinition};

/// Resolves the credentials to attach to one upstream call
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    schemes: Arc<BTreeMap<String, SecurityScheme>>,
    env: Arc<CredentialEnv>,
    tokens: Arc<TokenCache>,
    session_header: Option<String>,
}

impl CredentialResolver {
    /// Create a resolver over the declared `schemes`
    #[must_use]
    pub fn new(
        schemes: BTreeMap<String, SecurityScheme>,
        env: CredentialEnv,
        tokens: Arc<TokenCache>,
    ) -> Self {
        // the session bearer is written to the first header-borne API key
        let session_header = schemes.values().find_map(|scheme| match scheme {
            SecurityScheme::ApiKey {
                location: ApiKeyLocation::Header,
                name,
                ..
            } => Some(name.to_lowercase()),
            _ => None,
        });
        Self {
            schemes: Arc::new(schemes),
            env: Arc::new(env),
            tokens,
            session_header,
        }
    }

    /// Credentials for a call to `definition`.
    ///
    /// A non-empty `session_credential` overrides every declared scheme.
    /// Otherwise the first satisfiable alternative is applied; when none is,
    /// a warning is logged and the call goes out unauthenticated.
    pub async fn resolve(
        &self,
        definition: &ToolDefinition,
        session_credential: Option<&str>,
    ) -> Vec<CredentialAssignment> {
        if let Some(token) = session_credential.filter(|t| !t.is_empty()) {
            debug!(tool = %definition.name, "Applying session credential");
            return vec![match &self.session_header {
                Some(header) => CredentialAssignment::header(header.as_str(), token),
                None => CredentialAssignment::header("authorization", format!("Bearer {token}")),
            }];
        }

        let Some(alternative) = definition
            .security
            .iter()
            .find(|alternative| self.satisfiable(alternative))
        else {
            if !definition.security.is_empty() {
                warn!(
                    "Tool '{}' requires security: {}, but no suitable credentials found.",
                    definition.name,
                    describe_requirements(&definition.security)
                );
            }
            return Vec::new();
        };

        let mut assignments = Vec::new();
        for scheme_name in alternative.keys() {
            if let Some(assignment) = self.apply(scheme_name).await {
                debug!(tool = %definition.name, scheme = %scheme_name, "Applied credential");
                assignments.push(assignment);
            }
        }
        assignments
    }

    fn satisfiable(&self, alternative: &SecurityRequirement) -> bool {
        alternative.keys().all(|name| {
            let Some(scheme) = self.schemes.get(name) else {
                return false;
            };
            let has = |p: &str| self.env.scheme_value(p, name).is_some();
            match scheme {
                SecurityScheme::ApiKey { .. } => has(prefix::API_KEY),
                SecurityScheme::Http { scheme, .. } => match scheme.to_lowercase().as_str() {
                    "bearer" => has(prefix::BEARER_TOKEN),
                    "basic" => has(prefix::BASIC_USERNAME) && has(prefix::BASIC_PASSWORD),
                    _ => false,
                },
                SecurityScheme::OAuth2 { flows, .. } => {
                    has(prefix::OAUTH_TOKEN)
                        || (has(prefix::OAUTH_CLIENT_ID)
                            && has(prefix::OAUTH_CLIENT_SECRET)
                            && flows.token_url().is_some())
                }
                SecurityScheme::OpenIdConnect { .. } => has(prefix::OPENID_TOKEN),
            }
        })
    }

    async fn apply(&self, name: &str) -> Option<CredentialAssignment> {
        let value = |p: &str| self.env.scheme_value(p, name);
        match self.schemes.get(name)? {
            SecurityScheme::ApiKey {
                location,
                name: key_name,
                ..
            } => {
                let key = value(prefix::API_KEY)?.to_string();
                let name = key_name.clone();
                Some(match location {
                    ApiKeyLocation::Header => CredentialAssignment::Header { name, value: key },
                    ApiKeyLocation::Query => CredentialAssignment::Query { name, value: key },
                    ApiKeyLocation::Cookie => CredentialAssignment::Cookie { name, value: key },
                })
            }
            SecurityScheme::Http { scheme, .. } => match scheme.to_lowercase().as_str() {
                "bearer" => value(prefix::BEARER_TOKEN)
                    .map(|t| CredentialAssignment::header("authorization", format!("Bearer {t}"))),
                "basic" => {
                    let user = value(prefix::BASIC_USERNAME)?;
                    let password = value(prefix::BASIC_PASSWORD)?;
                    let encoded = STANDARD.encode(format!("{user}:{password}"));
                    Some(CredentialAssignment::header(
                        "authorization",
                        format!("Basic {encoded}"),
                    ))
                }
                _ => None,
            },
            SecurityScheme::OAuth2 { flows, .. } => {
                let token = match value(prefix::OAUTH_TOKEN) {
                    Some(token) => token.to_string(),
                    None => {
                        self.tokens
                            .token(TokenRequest {
                                scheme: name,
                                token_url: flows.token_url()?,
                                client_id: value(prefix::OAUTH_CLIENT_ID)?,
                                client_secret: value(prefix::OAUTH_CLIENT_SECRET)?,
                                scopes: value(prefix::OAUTH_SCOPES),
                            })
                            .await?
                    }
                };
                Some(CredentialAssignment::header(
                    "authorization",
                    format!("Bearer {token}"),
                ))
            }
            SecurityScheme::OpenIdConnect { .. } => value(prefix::OPENID_TOKEN)
                .map(|t| CredentialAssignment::header("authorization", format!("Bearer {t}"))),
        }
    }
}

/// `[a AND b (scopes: x, y)] OR [c]`
fn describe_requirements(requirements: &[SecurityRequirement]) -> String {
    requirements
        .iter()
        .map(|alternative| {
            let parts = alternative
                .iter()
                .map(|(name, scopes)| {
                    if scopes.is_empty() {
                        name.clone()
                    } else {
                        format!("{name} (scopes: {})", scopes.join(", "))
                    }
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("[{parts}]")
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}
