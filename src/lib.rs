#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod error;
pub mod request_logger;
pub mod routes;

use crate::auth::{AuthConfig, PgSessionRepository, SessionAuthority};
use crate::db::ChirpyDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::{Method, Status};
use rocket::serde::json::Json;
use rocket::{Build, Request, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use serde::Serialize;
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

#[derive(Debug, Serialize)]
struct CatcherResponse {
    error: String,
    message: String,
}

/// JSON body for failures raised before a handler runs (guards, routing).
#[catch(default)]
fn default_catcher(status: Status, _request: &Request<'_>) -> Json<CatcherResponse> {
    Json(CatcherResponse {
        error: status.reason().unwrap_or("Error").to_string(),
        message: match status.code {
            401 => "authentication required".to_string(),
            403 => "forbidden".to_string(),
            404 => "not found".to_string(),
            code if code >= 500 => "internal error".to_string(),
            _ => "request rejected".to_string(),
        },
    })
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("starting Chirpy API server");

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(ChirpyDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match ChirpyDb::fetch(&rocket) {
                    Some(database) => {
                        let pool = (**database).clone();
                        match db::run_migrations(&pool).await {
                            Ok(()) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Session Authority",
            |rocket| async move {
                let config = match AuthConfig::from_env() {
                    Ok(config) => config,
                    Err(err) => {
                        log::error!("auth configuration invalid: {}", err);
                        return Err(rocket);
                    }
                };
                let Some(database) = ChirpyDb::fetch(&rocket) else {
                    log::error!("database pool not available for session store");
                    return Err(rocket);
                };
                let repository = Arc::new(PgSessionRepository::new((**database).clone()));

                match SessionAuthority::from_config(&config, repository) {
                    Ok(authority) => {
                        log::info!("session authority ready (issuer {})", config.issuer);
                        Ok(rocket.manage(authority))
                    }
                    Err(err) => {
                        log::error!("failed to build session authority: {}", err);
                        Err(rocket)
                    }
                }
            },
        ));

    mount_api(rocket)
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Chirpy API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

/// Mount the versioned API and JSON catchers onto `rocket`.
pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Auth routes
                auth::routes::login,
                auth::routes::refresh,
                auth::routes::revoke,
                auth::routes::whoami,
            ],
        )
        .register("/", catchers![default_catcher])
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};

    use crate::auth::{
        AuthConfig, MemorySessionRepository, PasswordParams, SessionAuthority, SessionRepository,
    };

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "chirpy-test-secret";
    pub const TEST_SERVICE_KEY: &str = "f271c81ff7084ee5b99a5091b42d486e";

    /// Auth configuration with cheap password hashing for tests.
    pub fn test_auth_config() -> AuthConfig {
        let mut config = AuthConfig::new(TEST_JWT_SECRET);
        config.password = PasswordParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        };
        config.service_api_key = Some(TEST_SERVICE_KEY.into());
        config
    }

    /// Session authority backed by the given repository.
    pub fn test_authority(repository: Arc<dyn SessionRepository>) -> SessionAuthority {
        SessionAuthority::from_config(&test_auth_config(), repository)
            .expect("test session authority")
    }

    /// Session authority over a fresh in-memory store, returned alongside it.
    pub fn memory_authority() -> (SessionAuthority, MemorySessionRepository) {
        let repository = MemorySessionRepository::new();
        let authority = test_authority(Arc::new(repository.clone()));
        (authority, repository)
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        const POSTGRES_TAG: &str = "16-alpine";

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("neither TEST_DATABASE_URL nor CHIRPY_TEST_CONTAINERS is set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database on `TEST_DATABASE_URL`, or in a
            /// disposable Postgres container when `CHIRPY_TEST_CONTAINERS` is set.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    let options: PgConnectOptions = url.parse()?;
                    return Self::provision(options, None).await;
                }
                if std::env::var_os("CHIRPY_TEST_CONTAINERS").is_some() {
                    return Self::new().await;
                }
                Err(TestDatabaseError::MissingUrl)
            }

            /// Provision a fresh database inside a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default()
                    .with_tag(POSTGRES_TAG)
                    .start()
                    .await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                let options: PgConnectOptions = admin_url.parse()?;

                Self::provision(options, Some(container)).await
            }

            async fn provision(
                base_options: PgConnectOptions,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options = base_options.log_statements(LevelFilter::Off);
                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&new_db_name))
                    .await?;

                crate::db::run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options.clone())
                    .await?;
                let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.database_name);
                sqlx::query(&drop_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        authority: Option<SessionAuthority>,
        api: bool,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                authority: None,
                api: false,
            }
        }

        /// Mount the full `/api/v1` surface and JSON catchers.
        pub fn with_api(mut self) -> Self {
            self.api = true;
            self
        }

        /// Mount extra routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a [`SessionAuthority`] for guards and auth handlers.
        pub fn manage_authority(mut self, authority: SessionAuthority) -> Self {
            self.authority = Some(authority);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            if self.api {
                rocket = crate::mount_api(rocket);
            }

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(authority) = self.authority {
                rocket = rocket.manage(authority);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
