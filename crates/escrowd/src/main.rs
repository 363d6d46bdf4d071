//! escrowd - The deposit escrow background service
//!
//! This is the main entry point for the escrowd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Identity, provider and ledger collaborators
//! - Escrow engine
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use escrow_api::{
    ClientInfo, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Params,
    Request, Response, ResponsePayload, API_VERSION,
};
use escrow_config::{load_config, ServiceConfig};
use escrow_core::{Collaborators, CoreEvent, EscrowEngine, SessionRequest};
use escrow_gateway::{MemoryLedger, StaticIdentityRegistry, StaticProviderRegistry};
use escrow_ipc::{IpcServer, ServerMessage};
use escrow_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use escrow_util::{
    default_config_path, default_data_dir, default_socket_path, is_mock_time_active,
    AccountId, RateLimiter, ESCROW_DATA_DIR_ENV, ESCROW_SOCKET_ENV,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// escrowd - Deposit escrow for EV charging sessions
#[derive(Parser, Debug)]
#[command(name = "escrowd")]
#[command(about = "Deposit escrow for EV charging sessions", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/escrowd/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set ESCROW_SOCKET env var)
    #[arg(short, long, env = ESCROW_SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Data directory override (or set ESCROW_DATA_DIR env var)
    #[arg(short, long, env = ESCROW_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Which local users may speak for which accounts
#[derive(Debug, Clone)]
struct CallerBindings {
    admin: AccountId,
    uids: HashMap<AccountId, u32>,
}

impl CallerBindings {
    fn from_config(config: &ServiceConfig) -> Self {
        let uids = config
            .accounts
            .iter()
            .filter_map(|account| account.uid.map(|uid| (account.id.clone(), uid)))
            .collect();

        Self {
            admin: config.service.admin.clone(),
            uids,
        }
    }

    /// Accept `caller` only when the connecting peer is bound to it.
    /// Admin-role peers may also act as the configured admin.
    fn authorize(&self, client: &ClientInfo, caller: &AccountId) -> Result<(), ErrorInfo> {
        if client.role.can_administer() && caller == &self.admin {
            return Ok(());
        }

        match (client.uid, self.uids.get(caller)) {
            (Some(peer), Some(&bound)) if peer == bound => Ok(()),
            _ => Err(ErrorInfo::new(
                ErrorCode::PermissionDenied,
                format!("Connection is not bound to account {}", caller),
            )),
        }
    }
}

/// Main service state
struct Service {
    engine: Arc<EscrowEngine>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    bindings: Arc<CallerBindings>,
    rate_limiter: RateLimiter,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            vehicles = config.vehicles.len(),
            chargers = config.chargers.len(),
            accounts = config.accounts.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .or_else(|| config.service.socket_path.clone())
            .unwrap_or_else(default_socket_path);

        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| config.service.data_dir.clone())
            .unwrap_or_else(default_data_dir);

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("escrowd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let bindings = CallerBindings::from_config(&config);
        if bindings.uids.is_empty() {
            warn!("No account is bound to a uid; only the admin can change escrow state");
        }

        let collaborators = build_collaborators(&config)?;
        let engine = EscrowEngine::new(
            store.clone(),
            collaborators,
            config.service.admin.clone(),
            config.initial_params,
        )
        .context("Failed to initialize escrow engine")?;

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            engine: Arc::new(engine),
            ipc: Arc::new(ipc),
            store,
            bindings: Arc::new(bindings),
            rate_limiter,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let engine = self.engine.clone();
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));
        let store = self.store.clone();
        let bindings = self.bindings.clone();

        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        info!(admin = %engine.admin(), "Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&engine, &ipc_ref, &store, &bindings, &rate_limiter, msg)
                        .await;
                }
            }
        }

        info!("Shutting down escrowd");

        ipc_ref.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        ipc_ref.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(
        engine: &Arc<EscrowEngine>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn Store>,
        bindings: &CallerBindings,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let Some(client) = ipc.get_client_info(&client_id).await else {
                    debug!(client_id = %client_id, "Request from a client that already left");
                    return;
                };

                let (response, event) =
                    handle_command(engine, store.as_ref(), bindings, &client, request);

                if let Err(e) = ipc.send_response(&client_id, response).await {
                    debug!(client_id = %client_id, error = %e, "Failed to deliver response");
                }

                if let Some(event) = event {
                    ipc.broadcast_event(Event::new(event.into()));
                }
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::ClientConnected {
                        client_id: client_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    },
                ));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    },
                ));

                let mut limiter = rate_limiter.lock().await;
                limiter.remove_client(&client_id);
            }
        }
    }
}

/// Seed the in-process registries and ledger from configuration
fn build_collaborators(config: &ServiceConfig) -> Result<Collaborators> {
    let identities = StaticIdentityRegistry::new();
    for vehicle in &config.vehicles {
        identities.register(vehicle.vehicle_ref.clone(), vehicle.owner.clone());
    }

    let providers = StaticProviderRegistry::new();
    for charger in &config.chargers {
        providers.register(charger.id.clone(), charger.owner.clone(), charger.active);
    }

    let ledger = MemoryLedger::new();
    for account in &config.accounts {
        ledger
            .fund(&account.id, account.balance)
            .with_context(|| format!("Failed to fund account {}", account.id))?;
        ledger
            .approve(&account.id, account.allowance)
            .with_context(|| format!("Failed to approve allowance for {}", account.id))?;
    }

    info!(
        vehicles = identities.len(),
        chargers = providers.len(),
        "Collaborators seeded"
    );

    Ok(Collaborators {
        identities: Arc::new(identities),
        providers: Arc::new(providers),
        ledger: Arc::new(ledger),
    })
}

/// Answer one request, returning the event to broadcast if state changed
fn handle_command(
    engine: &EscrowEngine,
    store: &dyn Store,
    bindings: &CallerBindings,
    client: &ClientInfo,
    request: Request,
) -> (Response, Option<CoreEvent>) {
    let request_id = request.request_id;
    match dispatch(engine, store, bindings, client, request) {
        Ok((payload, event)) => (Response::success(request_id, payload), event),
        Err(err) => {
            debug!(
                request_id,
                client_id = %client.client_id,
                code = ?err.code,
                message = %err.message,
                "Request rejected"
            );
            (Response::error(request_id, err), None)
        }
    }
}

fn dispatch(
    engine: &EscrowEngine,
    store: &dyn Store,
    bindings: &CallerBindings,
    client: &ClientInfo,
    request: Request,
) -> Result<(ResponsePayload, Option<CoreEvent>), ErrorInfo> {
    if request.api_version != API_VERSION {
        return Err(ErrorInfo::new(
            ErrorCode::InvalidRequest,
            format!(
                "Unsupported API version {} (expected {})",
                request.api_version, API_VERSION
            ),
        ));
    }

    let command = request.command;
    if command.requires_admin() && !client.role.can_administer() {
        return Err(ErrorInfo::new(
            ErrorCode::PermissionDenied,
            "Admin role required",
        ));
    }
    if command.is_mutating() && !client.role.can_transact() {
        return Err(ErrorInfo::new(
            ErrorCode::PermissionDenied,
            "Observers cannot change escrow state",
        ));
    }

    let caller = request.caller;
    let caller = || {
        let caller = caller.as_ref().ok_or_else(|| {
            ErrorInfo::new(ErrorCode::InvalidRequest, "Mutating commands need a caller")
        })?;
        bindings.authorize(client, caller)?;
        Ok::<_, ErrorInfo>(caller)
    };

    let now = escrow_util::now();
    let session = |update: escrow_core::SessionUpdate| {
        (ResponsePayload::Session(update.session), Some(update.event))
    };
    let rejected = |e: escrow_core::EscrowError| ErrorInfo::new(e.code(), e.to_string());

    match command {
        Command::GetParams => {
            let params = engine.get_params().map_err(rejected)?;
            Ok((ResponsePayload::Params(params), None))
        }

        Command::GetSession { session_id } => {
            let found = engine.get_session(session_id).map_err(rejected)?;
            Ok((ResponsePayload::Session(found), None))
        }

        Command::ListSessions { filter, limit } => {
            let sessions = engine.list_sessions(&filter, limit).map_err(rejected)?;
            Ok((ResponsePayload::Sessions { sessions }, None))
        }

        Command::IsTrusted { driver, charger_id } => {
            let trusted = engine.is_trusted(&driver, &charger_id).map_err(rejected)?;
            Ok((ResponsePayload::Trusted { trusted }, None))
        }

        Command::CreateSession {
            vehicle_ref,
            charger_id,
            deposit,
            sponsor,
            pre_authorization,
        } => {
            let request = SessionRequest {
                vehicle_ref,
                charger_id,
                deposit,
                pre_authorization,
            };
            engine
                .create_session(caller()?, request, sponsor, now)
                .map(session)
                .map_err(rejected)
        }

        Command::CreateSessionByCharger {
            payer,
            vehicle_ref,
            charger_id,
            deposit,
            pre_authorization,
        } => {
            let request = SessionRequest {
                vehicle_ref,
                charger_id,
                deposit,
                pre_authorization,
            };
            engine
                .create_session_by_charger(caller()?, payer, request, now)
                .map(session)
                .map_err(rejected)
        }

        Command::CreateGuestSession {
            payer,
            vehicle_ref,
            charger_id,
            deposit,
            pre_authorization,
        } => {
            let request = SessionRequest {
                vehicle_ref,
                charger_id,
                deposit,
                pre_authorization,
            };
            engine
                .create_guest_session(caller()?, payer, request, now)
                .map(session)
                .map_err(rejected)
        }

        Command::AddDeposit {
            session_id,
            amount,
            pre_authorization,
        } => engine
            .add_deposit(caller()?, session_id, amount, pre_authorization.as_ref())
            .map(session)
            .map_err(rejected),

        Command::EndAndPropose { session_id, amount } => engine
            .end_and_propose(caller()?, session_id, amount, now)
            .map(session)
            .map_err(rejected),

        Command::Dispute { session_id } => engine
            .dispute(caller()?, session_id, now)
            .map(session)
            .map_err(rejected),

        Command::FinalizeIfNoDispute { session_id } => engine
            .finalize_if_no_dispute(session_id, now)
            .map(session)
            .map_err(rejected),

        Command::RefundIfStale { session_id } => engine
            .refund_if_stale(session_id, now)
            .map(session)
            .map_err(rejected),

        Command::SetTrustedCharger {
            driver,
            charger_id,
            trusted,
        } => {
            let event = engine
                .set_trusted_charger(caller()?, &driver, &charger_id, trusted)
                .map_err(rejected)?;
            let payload = ResponsePayload::TrustUpdated {
                driver,
                charger_id,
                trusted,
            };
            Ok((payload, Some(event)))
        }

        Command::ResolveDispute {
            session_id,
            driver_amount,
            charger_amount,
        } => engine
            .resolve_dispute(caller()?, session_id, driver_amount, charger_amount)
            .map(session)
            .map_err(rejected),

        Command::UpdateParams {
            min_deposit,
            max_deposit,
            refund_timeout,
        } => {
            let params = Params {
                min_deposit,
                max_deposit,
                refund_timeout,
            };
            let event = engine.update_params(caller()?, params).map_err(rejected)?;
            Ok((ResponsePayload::Params(params), Some(event)))
        }

        Command::SubscribeEvents => Ok((
            ResponsePayload::Subscribed {
                client_id: client.client_id,
            },
            None,
        )),

        Command::UnsubscribeEvents => Ok((ResponsePayload::Unsubscribed, None)),

        Command::GetHealth => {
            let health = HealthStatus {
                live: true,
                ready: engine.is_healthy(),
                store_ok: store.is_healthy(),
                mock_time: is_mock_time_active(),
            };
            Ok((ResponsePayload::Health(health), None))
        }

        Command::Ping => Ok((ResponsePayload::Pong, None)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "escrowd starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_api::{ClientRole, ResponseResult, SessionFilter, SessionState};
    use escrow_config::parse_config;
    use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};

    const CONFIG: &str = r#"
        config_version = 1

        [service]
        admin = "arbiter"

        [params]
        min_deposit = 10
        max_deposit = 100
        refund_timeout_seconds = 3600

        [[vehicles]]
        vehicle_ref = "VIN-ALICE"
        owner = "alice"

        [[chargers]]
        id = "CH-1"
        owner = "bob"

        [[accounts]]
        id = "alice"
        balance = 1000
        allowance = 1000
        uid = 1001

        [[accounts]]
        id = "bob"
        uid = 1002
    "#;

    struct Daemon {
        engine: EscrowEngine,
        store: Arc<dyn Store>,
        bindings: CallerBindings,
    }

    impl Daemon {
        fn handle(&self, client: &ClientInfo, request: Request) -> (Response, Option<CoreEvent>) {
            handle_command(&self.engine, self.store.as_ref(), &self.bindings, client, request)
        }
    }

    fn setup() -> Daemon {
        let config = parse_config(CONFIG).unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = EscrowEngine::new(
            store.clone(),
            build_collaborators(&config).unwrap(),
            config.service.admin.clone(),
            config.initial_params,
        )
        .unwrap();
        Daemon {
            engine,
            store,
            bindings: CallerBindings::from_config(&config),
        }
    }

    /// A participant connection with no account bound to it
    fn participant() -> ClientInfo {
        ClientInfo::new(ClientRole::Participant).with_uid(2000)
    }

    fn connected_as(account: &str) -> ClientInfo {
        let uid = match account {
            "alice" => 1001,
            "bob" => 1002,
            other => panic!("No uid bound to {other}"),
        };
        ClientInfo::new(ClientRole::Participant).with_uid(uid)
    }

    fn as_caller(caller: &str, command: Command) -> Request {
        Request::new(1, command).with_caller(AccountId::new(caller))
    }

    fn create(deposit: u64) -> Command {
        Command::CreateSession {
            vehicle_ref: VehicleRef::new("VIN-ALICE"),
            charger_id: ChargerId::new("CH-1"),
            deposit,
            sponsor: None,
            pre_authorization: None,
        }
    }

    fn expect_session(response: &Response) -> &escrow_api::Session {
        match &response.result {
            ResponseResult::Ok(ResponsePayload::Session(session)) => session,
            other => panic!("Expected session, got {other:?}"),
        }
    }

    fn expect_error(response: &Response) -> ErrorCode {
        match &response.result {
            ResponseResult::Err(e) => e.code,
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_ping_and_subscribe() {
        let daemon = setup();
        let client = participant();

        let (response, event) = daemon.handle(&client, Request::new(1, Command::Ping));
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));
        assert!(event.is_none());

        let (response, _) = daemon.handle(&client, Request::new(2, Command::SubscribeEvents));
        match response.result {
            ResponseResult::Ok(ResponsePayload::Subscribed { client_id }) => {
                assert_eq!(client_id, client.client_id);
            }
            other => panic!("Expected subscribed, got {other:?}"),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let daemon = setup();
        let mut request = Request::new(1, Command::GetParams);
        request.api_version = API_VERSION + 1;

        let (response, _) = daemon.handle(&participant(), request);
        assert_eq!(expect_error(&response), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_mutation_needs_caller() {
        let daemon = setup();
        let (response, event) = daemon.handle(&connected_as("alice"), Request::new(1, create(50)));

        assert_eq!(expect_error(&response), ErrorCode::InvalidRequest);
        assert!(event.is_none());
        assert!(daemon.store.get_session(SessionId::FIRST).unwrap().is_none());
    }

    #[test]
    fn test_caller_must_match_peer_uid() {
        let daemon = setup();

        // bob's connection claiming to be alice
        let (response, event) = daemon.handle(&connected_as("bob"), as_caller("alice", create(50)));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);
        assert!(event.is_none());
        assert!(daemon.store.get_session(SessionId::FIRST).unwrap().is_none());

        // Unbound uid and unknown uid are both refused
        let (response, _) = daemon.handle(&participant(), as_caller("alice", create(50)));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);
        let anonymous = ClientInfo::new(ClientRole::Participant);
        let (response, _) = daemon.handle(&anonymous, as_caller("alice", create(50)));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);

        // An admin connection may not borrow a participant's account either
        let admin = ClientInfo::new(ClientRole::Admin).with_uid(0);
        let (response, _) = daemon.handle(&admin, as_caller("alice", create(50)));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);

        let (response, _) = daemon.handle(&connected_as("alice"), as_caller("alice", create(50)));
        assert_eq!(expect_session(&response).driver, AccountId::new("alice"));
    }

    #[test]
    fn test_role_permissions() {
        let daemon = setup();

        let observer = ClientInfo::new(ClientRole::Observer);
        let (response, _) = daemon.handle(&observer, as_caller("alice", create(50)));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);

        // Reads stay open to observers
        let (response, _) = daemon.handle(&observer, Request::new(2, Command::GetParams));
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Params(_))));

        let update = Command::UpdateParams {
            min_deposit: 1,
            max_deposit: 10,
            refund_timeout: Duration::from_secs(60),
        };
        let (response, _) = daemon.handle(&participant(), as_caller("arbiter", update));
        assert_eq!(expect_error(&response), ErrorCode::PermissionDenied);
    }

    #[test]
    fn test_engine_errors_keep_their_code() {
        let daemon = setup();

        let (response, _) = daemon.handle(&connected_as("alice"), as_caller("alice", create(500)));
        assert_eq!(expect_error(&response), ErrorCode::OutOfBounds);

        let missing = Command::GetSession {
            session_id: SessionId::new(42),
        };
        let (response, _) = daemon.handle(&participant(), Request::new(2, missing));
        assert_eq!(expect_error(&response), ErrorCode::SessionNotFound);
    }

    #[test]
    fn test_dispute_resolved_by_admin() {
        let daemon = setup();
        let alice = connected_as("alice");
        let bob = connected_as("bob");
        let admin = ClientInfo::new(ClientRole::Admin).with_uid(0);

        let (response, event) = daemon.handle(&alice, as_caller("alice", create(50)));
        let id = expect_session(&response).id;
        assert!(matches!(event, Some(CoreEvent::SessionCreated { .. })));

        let propose = Command::EndAndPropose {
            session_id: id,
            amount: 30,
        };
        let (response, _) = daemon.handle(&bob, as_caller("bob", propose));
        assert_eq!(expect_session(&response).state, SessionState::Proposed);

        let (response, _) =
            daemon.handle(&alice, as_caller("alice", Command::Dispute { session_id: id }));
        assert_eq!(expect_session(&response).state, SessionState::Disputed);

        let resolve = Command::ResolveDispute {
            session_id: id,
            driver_amount: 35,
            charger_amount: 15,
        };
        let (response, event) = daemon.handle(&admin, as_caller("arbiter", resolve));
        assert_eq!(expect_session(&response).state, SessionState::Settled);

        let payload: EventPayload = event.unwrap().into();
        assert_eq!(
            payload,
            EventPayload::Settled {
                session_id: id,
                driver_amount: 35,
                charger_amount: 15,
            }
        );
    }

    #[test]
    fn test_list_sessions_filter() {
        let daemon = setup();
        let alice = connected_as("alice");

        for deposit in [20, 30] {
            daemon.handle(&alice, as_caller("alice", create(deposit)));
        }
        let propose = Command::EndAndPropose {
            session_id: SessionId::FIRST,
            amount: 5,
        };
        daemon.handle(&connected_as("bob"), as_caller("bob", propose));

        let list = Command::ListSessions {
            filter: SessionFilter {
                state: Some(SessionState::Active),
                ..Default::default()
            },
            limit: None,
        };
        let (response, _) = daemon.handle(&participant(), Request::new(9, list));
        match response.result {
            ResponseResult::Ok(ResponsePayload::Sessions { sessions }) => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].reserved, 30);
            }
            other => panic!("Expected sessions, got {other:?}"),
        }
    }

    #[test]
    fn test_trust_roundtrip() {
        let daemon = setup();

        let set = Command::SetTrustedCharger {
            driver: AccountId::new("alice"),
            charger_id: ChargerId::new("CH-1"),
            trusted: true,
        };
        let (_, event) = daemon.handle(&connected_as("alice"), as_caller("alice", set));
        assert!(matches!(event, Some(CoreEvent::TrustedChargerSet { trusted: true, .. })));

        let query = Command::IsTrusted {
            driver: AccountId::new("alice"),
            charger_id: ChargerId::new("CH-1"),
        };
        let (response, _) = daemon.handle(&participant(), Request::new(2, query));
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::Trusted { trusted: true })
        ));
    }

    #[test]
    fn test_health_reports_store() {
        let daemon = setup();
        let (response, _) = daemon.handle(&participant(), Request::new(1, Command::GetHealth));
        match response.result {
            ResponseResult::Ok(ResponsePayload::Health(health)) => {
                assert!(health.live);
                assert!(health.ready);
                assert!(health.store_ok);
            }
            other => panic!("Expected health, got {other:?}"),
        }
    }
}
