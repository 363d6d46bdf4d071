//! Integration tests for escrowd
//!
//! These tests drive the engine through configuration, the SQLite store and
//! the in-process ledger the way the daemon wires them.

use chrono::{DateTime, TimeZone, Utc};
use escrow_api::{Command, EventPayload, Params, SessionState};
use escrow_config::{parse_config, ServiceConfig};
use escrow_core::{Collaborators, CoreEvent, EscrowEngine, EscrowError, SessionRequest};
use escrow_gateway::{MemoryLedger, StaticIdentityRegistry, StaticProviderRegistry};
use escrow_ipc::{IpcClient, IpcServer, ServerMessage};
use escrow_store::{SqliteStore, Store};
use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};
use std::sync::Arc;
use std::time::Duration;

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
balance = 500
allowance = 500

[[accounts]]
id = "carol"
balance = 200
allowance = 200
"#;

struct Harness {
    engine: EscrowEngine,
    ledger: Arc<MemoryLedger>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn after(seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(seconds)
}

fn harness_with_store(config: &ServiceConfig, store: Arc<dyn Store>) -> Harness {
    let identities = StaticIdentityRegistry::new();
    for vehicle in &config.vehicles {
        identities.register(vehicle.vehicle_ref.clone(), vehicle.owner.clone());
    }

    let providers = StaticProviderRegistry::new();
    for charger in &config.chargers {
        providers.register(charger.id.clone(), charger.owner.clone(), charger.active);
    }

    let ledger = Arc::new(MemoryLedger::new());
    for account in &config.accounts {
        ledger.fund(&account.id, account.balance).unwrap();
        ledger.approve(&account.id, account.allowance).unwrap();
    }

    let engine = EscrowEngine::new(
        store,
        Collaborators {
            identities: Arc::new(identities),
            providers: Arc::new(providers),
            ledger: ledger.clone(),
        },
        config.service.admin.clone(),
        config.initial_params,
    )
    .unwrap();

    Harness { engine, ledger }
}

fn harness() -> Harness {
    let config = parse_config(CONFIG).unwrap();
    harness_with_store(&config, Arc::new(SqliteStore::in_memory().unwrap()))
}

fn alice() -> AccountId {
    AccountId::new("alice")
}

fn bob() -> AccountId {
    AccountId::new("bob")
}

fn request(deposit: u64) -> SessionRequest {
    SessionRequest {
        vehicle_ref: VehicleRef::new("VIN-ALICE"),
        charger_id: ChargerId::new("CH-1"),
        deposit,
        pre_authorization: None,
    }
}

#[test]
fn test_config_parsing() {
    let config = parse_config(CONFIG).unwrap();

    assert_eq!(config.service.admin, AccountId::new("arbiter"));
    assert_eq!(config.initial_params.min_deposit, 10);
    assert_eq!(config.initial_params.max_deposit, 100);
    assert_eq!(config.initial_params.refund_timeout, Duration::from_secs(3600));
    assert_eq!(config.vehicles.len(), 1);
    assert!(config.chargers[0].active);
    assert_eq!(config.accounts.len(), 2);
}

#[test]
fn test_proposal_finalized_after_window() {
    let h = harness();

    let created = h.engine.create_session(&alice(), request(50), None, t0()).unwrap();
    let id = created.session.id;
    assert_eq!(h.ledger.balance_of(&alice()), 450);
    assert_eq!(h.ledger.escrow_balance(), 50);

    h.engine.end_and_propose(&bob(), id, 30, after(60)).unwrap();

    // Window still open one second before the deadline
    let early = h.engine.finalize_if_no_dispute(id, after(60 + 3599));
    assert!(matches!(early, Err(EscrowError::BadState { .. })));

    let settled = h.engine.finalize_if_no_dispute(id, after(60 + 3601)).unwrap();
    assert_eq!(settled.session.state, SessionState::Settled);
    assert_eq!(
        settled.event,
        CoreEvent::Settled {
            session_id: id,
            driver_amount: 20,
            charger_recipient: bob(),
            charger_amount: 30,
        }
    );

    assert_eq!(h.ledger.balance_of(&alice()), 470);
    assert_eq!(h.ledger.balance_of(&bob()), 30);
    assert_eq!(h.ledger.escrow_balance(), 0);
}

#[test]
fn test_stale_session_refunded() {
    let h = harness();

    let id = h
        .engine
        .create_session(&alice(), request(50), None, t0())
        .unwrap()
        .session
        .id;

    let early = h.engine.refund_if_stale(id, after(1800));
    assert!(matches!(early, Err(EscrowError::BadState { .. })));

    let refunded = h.engine.refund_if_stale(id, after(3601)).unwrap();
    assert_eq!(refunded.session.state, SessionState::Refunded);
    assert_eq!(h.ledger.balance_of(&alice()), 500);
    assert_eq!(h.ledger.escrow_balance(), 0);

    // Terminal sessions cannot be refunded twice
    let again = h.engine.refund_if_stale(id, after(7200));
    assert!(matches!(again, Err(EscrowError::BadState { .. })));
}

#[test]
fn test_charger_session_requires_trust() {
    let h = harness();

    let untrusted = h
        .engine
        .create_session_by_charger(&bob(), alice(), request(40), t0());
    assert!(matches!(untrusted, Err(EscrowError::NotTrusted { .. })));
    assert_eq!(h.ledger.balance_of(&alice()), 500);

    h.engine
        .set_trusted_charger(&alice(), &alice(), &ChargerId::new("CH-1"), true)
        .unwrap();

    let update = h
        .engine
        .create_session_by_charger(&bob(), alice(), request(40), t0())
        .unwrap();
    assert_eq!(update.session.driver, alice());
    assert_eq!(h.ledger.balance_of(&alice()), 460);
}

#[test]
fn test_dispute_split_must_match_reserve() {
    let h = harness();
    let arbiter = AccountId::new("arbiter");

    let id = h
        .engine
        .create_session(&alice(), request(50), None, t0())
        .unwrap()
        .session
        .id;
    h.engine.end_and_propose(&bob(), id, 40, after(10)).unwrap();
    h.engine.dispute(&alice(), id, after(20)).unwrap();

    let wrong = h.engine.resolve_dispute(&arbiter, id, 25, 30);
    assert!(matches!(wrong, Err(EscrowError::OutOfBounds(_))));
    assert_eq!(
        h.engine.get_session(id).unwrap().state,
        SessionState::Disputed
    );

    let resolved = h.engine.resolve_dispute(&arbiter, id, 25, 25).unwrap();
    assert_eq!(resolved.session.state, SessionState::Settled);
    assert_eq!(h.ledger.balance_of(&alice()), 475);
    assert_eq!(h.ledger.balance_of(&bob()), 25);
}

#[test]
fn test_guest_session_billed_to_payer() {
    let h = harness();
    let carol = AccountId::new("carol");

    let update = h
        .engine
        .create_guest_session(&bob(), carol.clone(), request(60), t0())
        .unwrap();
    assert_eq!(update.session.driver, carol);
    assert_eq!(h.ledger.balance_of(&carol), 140);

    let id = update.session.id;
    h.engine.end_and_propose(&bob(), id, 60, after(5)).unwrap();
    h.engine.finalize_if_no_dispute(id, after(5 + 3601)).unwrap();

    assert_eq!(h.ledger.balance_of(&carol), 140);
    assert_eq!(h.ledger.balance_of(&bob()), 60);
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("escrowd.db");
    let config = parse_config(CONFIG).unwrap();
    let arbiter = AccountId::new("arbiter");

    let first_id = {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
        let h = harness_with_store(&config, store);

        let id = h
            .engine
            .create_session(&alice(), request(50), None, t0())
            .unwrap()
            .session
            .id;
        h.engine
            .set_trusted_charger(&alice(), &alice(), &ChargerId::new("CH-1"), true)
            .unwrap();
        h.engine
            .update_params(
                &arbiter,
                Params {
                    min_deposit: 5,
                    max_deposit: 80,
                    refund_timeout: Duration::from_secs(600),
                },
            )
            .unwrap();
        id
    };

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
    let h = harness_with_store(&config, store);

    // Stored parameters win over the configured seed
    let params = h.engine.get_params().unwrap();
    assert_eq!(params.max_deposit, 80);
    assert_eq!(params.refund_timeout, Duration::from_secs(600));

    let session = h.engine.get_session(first_id).unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.reserved, 50);
    assert!(h.engine.is_trusted(&alice(), &ChargerId::new("CH-1")).unwrap());

    let next = h
        .engine
        .create_session(&alice(), request(20), None, t0())
        .unwrap();
    assert_eq!(next.session.id, SessionId::new(first_id.get() + 1));
}

#[test]
fn test_core_events_publish_without_internals() {
    let event = CoreEvent::DepositAdded {
        session_id: SessionId::new(4),
        payer: AccountId::new("carol"),
        amount: 15,
    };

    let payload: EventPayload = event.into();
    assert_eq!(
        payload,
        EventPayload::DepositAdded {
            session_id: SessionId::new(4),
            amount: 15,
        }
    );
}

#[tokio::test]
async fn test_subscriber_receives_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("escrowd.sock");

    let mut server = IpcServer::new(&socket_path);
    server.start().await.unwrap();
    let server = Arc::new(server);
    let mut messages = server.take_message_receiver().await.unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });

    // Acknowledge every request
    let responder = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if let ServerMessage::Request { client_id, request } = msg {
                let payload = match request.command {
                    Command::SubscribeEvents => escrow_api::ResponsePayload::Subscribed { client_id },
                    _ => escrow_api::ResponsePayload::Pong,
                };
                let response = escrow_api::Response::success(request.request_id, payload);
                responder.send_response(&client_id, response).await.unwrap();
            }
        }
    });

    let client = IpcClient::connect(&socket_path).await.unwrap();
    let mut events = client.subscribe().await.unwrap();

    let refunded = CoreEvent::Refunded {
        session_id: SessionId::new(9),
        amount: 50,
    };
    server.broadcast_event(escrow_api::Event::new(refunded.into()));

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.payload,
        EventPayload::Refunded {
            session_id: SessionId::new(9),
            amount: 50,
        }
    );
}
