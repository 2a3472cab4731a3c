//! Database credential issuance
//!
//! Usernames and passwords are drawn from the operating system CSPRNG. The
//! password lives in a zeroize-on-drop buffer, and the Secret carrying it to
//! the orchestrator wipes its data when dropped; callers only ever get back a
//! [`CredentialRef`].

use std::ops::Deref;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

use kaas_common::{database_secret_name, Error};
use kaas_workload::compiler::{PASSWORD_KEY, USERNAME_KEY};
use kaas_workload::k8s::Secret;

use crate::client::OrchestratorClient;

/// Random characters after the `user-` prefix
pub const USERNAME_SUFFIX_LEN: usize = 10;

/// Password length; 32 alphanumerics carry about 190 bits
pub const PASSWORD_LEN: usize = 32;

const USERNAME_PREFIX: &str = "user-";
const LOWER_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Secret key holding the database host name
pub const HOST_KEY: &str = "host";
/// Secret key holding the database port
pub const PORT_KEY: &str = "port";
/// Secret key holding `host:port`
pub const ADDRESS_KEY: &str = "address";

/// A freshly generated username/password pair
pub struct Credentials {
    /// Database user
    pub username: String,
    /// Database password, wiped from memory on drop
    pub password: Zeroizing<String>,
}

impl Credentials {
    /// Generate a new pair from the OS random source
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let suffix: String = (0..USERNAME_SUFFIX_LEN)
            .map(|_| LOWER_ALNUM[rng.gen_range(0..LOWER_ALNUM.len())] as char)
            .collect();
        let password = Zeroizing::new(
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(PASSWORD_LEN)
                .map(char::from)
                .collect::<String>(),
        );
        Self {
            username: format!("{}{}", USERNAME_PREFIX, suffix),
            password,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A credential Secret whose string data is zeroized on drop
pub struct StagedSecret(Secret);

impl Deref for StagedSecret {
    type Target = Secret;

    fn deref(&self) -> &Secret {
        &self.0
    }
}

impl Drop for StagedSecret {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}

fn wipe(secret: &mut Secret) {
    secret.string_data.values_mut().for_each(Zeroize::zeroize);
}

/// Where a database's credentials were stored
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRef {
    /// Secret name
    pub secret_name: String,
    /// Key of the username in the Secret
    pub username_key: String,
    /// Key of the password in the Secret
    pub password_key: String,
    /// In-cluster host name of the database Service
    pub host: String,
    /// Database port
    pub port: u16,
}

/// Generates credentials and stores them as a Secret
pub struct CredentialIssuer<'a> {
    client: &'a dyn OrchestratorClient,
    namespace: &'a str,
    port: u16,
}

impl<'a> CredentialIssuer<'a> {
    /// Create an issuer writing to `namespace` for databases listening on `port`
    pub fn new(client: &'a dyn OrchestratorClient, namespace: &'a str, port: u16) -> Self {
        Self {
            client,
            namespace,
            port,
        }
    }

    /// In-cluster DNS name of a database's Service
    pub fn host(&self, database: &str) -> String {
        format!("{}.{}.svc.cluster.local", database, self.namespace)
    }

    /// Build the credential Secret for `database`
    pub fn secret(&self, database: &str, credentials: &Credentials) -> StagedSecret {
        let host = self.host(database);
        let address = format!("{}:{}", host, self.port);
        StagedSecret(
            Secret::new(database_secret_name(database), self.namespace)
                .with_data(USERNAME_KEY, credentials.username.as_str())
                .with_data(PASSWORD_KEY, credentials.password.as_str())
                .with_data(HOST_KEY, host)
                .with_data(PORT_KEY, self.port.to_string())
                .with_data(ADDRESS_KEY, address),
        )
    }

    /// Generate credentials for `database` and store them
    ///
    /// The orchestrator answers 409 if the Secret appeared since the caller's
    /// existence check; that surfaces as an upstream error.
    pub async fn issue(&self, database: &str) -> Result<CredentialRef, Error> {
        let credentials = Credentials::generate();
        let secret = self.secret(database, &credentials);
        self.client.create_secret(&secret).await?;

        let reference = CredentialRef {
            secret_name: secret.metadata.name.clone(),
            username_key: USERNAME_KEY.to_string(),
            password_key: PASSWORD_KEY.to_string(),
            host: self.host(database),
            port: self.port,
        };
        info!(
            database = %database,
            secret = %reference.secret_name,
            username = %credentials.username,
            "issued database credentials"
        );
        Ok(reference)
    }
}
