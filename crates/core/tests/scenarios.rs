//! End-to-end exercises of the state API: the store / navigate / index /
//! remove flows a contract actually performs, plus invariant sweeps over
//! randomized operation sequences.

use chaindb::{
    Action, CpuUnits, DatabaseApi, DbError, DeferredReference, DeferredTransaction,
    PermissionLevel, Resource, ResourceMeter, TrxContext, BASE_ROW_FEE,
};
use chaindb_datastore::{SecondaryKey, StateStore};
use chaindb_primitives::{F64Bits, Name};
use pretty_assertions::{assert_eq, assert_ne};
use proptest::prelude::*;

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

fn api<'db>(store: &'db mut StateStore, receiver: &str) -> DatabaseApi<'db> {
    let receiver = name(receiver);
    let act = Action {
        account: receiver,
        name: name("apply"),
        authorization: vec![PermissionLevel::new(receiver, name("active"))],
        data: Vec::new(),
    };
    let tx = store.begin_mut_tx();
    DatabaseApi::new(
        tx,
        receiver,
        act,
        TrxContext::default(),
        ResourceMeter::new(CpuUnits(1_000_000)),
    )
}

/// Sums what the meter should have charged, from the store's live contents.
fn expected_usage(store: &StateStore) -> i64 {
    let rows: i64 = store
        .rows()
        .map(|(_, kv)| kv.value.len() as i64 + BASE_ROW_FEE as i64)
        .sum();
    let idx: i64 = store.secondary::<u64>().len() as i64 * (BASE_ROW_FEE + u64::BYTE_WIDTH) as i64
        + store.secondary::<u128>().len() as i64 * (BASE_ROW_FEE + u128::BYTE_WIDTH) as i64
        + store.secondary::<ethnum::U256>().len() as i64
            * (BASE_ROW_FEE + ethnum::U256::BYTE_WIDTH) as i64
        + store.secondary::<F64Bits>().len() as i64 * (BASE_ROW_FEE + F64Bits::BYTE_WIDTH) as i64;
    rows + idx
}

#[test]
fn s1_first_store_creates_table_and_bills_payer() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let handle = api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    assert_eq!(handle, 0);

    let mut buf = [0u8; 16];
    assert_eq!(api.db_get_i64(handle, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");

    assert_eq!(api.db_find_i64(a, a, t, 5).unwrap(), 0);
    assert_eq!(api.db_end_i64(a, a, t).unwrap(), -2);
    assert_eq!(api.meter().usage_of(a), BASE_ROW_FEE as i64 + 5);
}

#[test]
fn s2_duplicate_primary_key_fails() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    let err = api.db_store_i64(a, t, a, 5, b"again").unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { primary: 5, .. }));
}

#[test]
fn s3_primary_navigation_walks_in_key_order() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let h5 = api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    let h3 = api.db_store_i64(a, t, a, 3, b"three").unwrap();

    assert_eq!(api.db_lowerbound_i64(a, a, t, 0).unwrap(), h3);

    let mut primary = 0;
    let next = api.db_next_i64(h3, &mut primary).unwrap();
    assert_eq!((next, primary), (h5, 5));
    assert_eq!(api.db_next_i64(h5, &mut primary).unwrap(), -2);
    assert_eq!(api.db_previous_i64(-2, &mut primary).unwrap(), h5);
    assert_eq!(primary, 5);

    // The sentinel is never a valid position to step from.
    assert!(matches!(
        api.db_next_i64(-1, &mut primary),
        Err(DbError::InvalidHandle(-1))
    ));
    assert!(matches!(
        api.db_previous_i64(-1, &mut primary),
        Err(DbError::InvalidHandle(-1))
    ));
}

#[test]
fn s4_removing_the_row_removes_its_secondary_entries() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let h5 = api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    api.db_store_i64(a, t, a, 3, b"three").unwrap();
    let idx = api.db_idx64_store(a, t, a, 5, 100).unwrap();
    assert_eq!(idx, 0);

    let mut primary = 0;
    let found = api.db_idx64_find_secondary(a, a, t, &100, &mut primary).unwrap();
    assert_eq!((found, primary), (idx, 5));

    api.db_remove_i64(h5).unwrap();

    // The secondary entry is gone with its row; only the end handle remains.
    let found = api.db_idx64_find_secondary(a, a, t, &100, &mut primary).unwrap();
    assert_eq!(found, -2);
    // The old secondary handle died with it.
    assert!(matches!(
        api.db_idx64_next(idx, &mut primary),
        Err(DbError::InvalidHandle(0))
    ));
    // And billing netted the row and index fees back out.
    assert_eq!(
        api.meter().usage_of(a),
        expected_usage(api.transaction().state())
    );
}

#[test]
fn s5_previous_from_end_stays_within_the_table() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let a = name("alice");
    let (t1, t2) = (name("alpha"), name("beta"));

    for (table, primary, key) in [(t1, 1u64, 10u128), (t1, 2, 20), (t2, 9, 90)] {
        api.db_store_i64(a, table, a, primary, b"row").unwrap();
        api.db_idx128_store(a, table, a, primary, key).unwrap();
    }

    let end_t1 = api.db_idx128_end(a, a, t1).unwrap();
    let end_t2 = api.db_idx128_end(a, a, t2).unwrap();
    assert_ne!(end_t1, end_t2);

    let mut primary = 0;
    api.db_idx128_previous(end_t1, &mut primary).unwrap();
    // Largest key within t1, not the globally largest.
    assert_eq!(primary, 2);
    api.db_idx128_previous(end_t2, &mut primary).unwrap();
    assert_eq!(primary, 9);
}

#[test]
fn s6_nan_keys_and_foreign_tables_are_rejected() {
    let mut store = StateStore::new();
    {
        let mut api = api(&mut store, "alice");
        let (a, t) = (name("alice"), name("tokens"));
        api.db_store_i64(a, t, a, 1, b"x").unwrap();
        let err = api.db_idx_double_store(a, t, a, 1, f64::NAN).unwrap_err();
        assert_eq!(err, DbError::NanKey);
        let (tx, _, _) = api.finish();
        tx.commit();
    }

    // Another contract may read alice's table but not mutate it.
    let mut api = api(&mut store, "bob");
    let (a, t) = (name("alice"), name("tokens"));
    let handle = api.db_find_i64(a, a, t, 1).unwrap();
    assert_eq!(handle, 0);
    let err = api.db_update_i64(handle, name("bob"), b"stolen").unwrap_err();
    assert_eq!(
        err,
        DbError::MissingAuth {
            actor: a,
            permission: None
        }
    );
    let err = api.db_remove_i64(handle).unwrap_err();
    assert!(matches!(err, DbError::MissingAuth { .. }));
}

#[test]
fn update_can_move_the_bill_to_a_new_payer() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, b, t) = (name("alice"), name("bob"), name("tokens"));

    let h = api.db_store_i64(a, t, a, 1, b"12345").unwrap();
    api.db_update_i64(h, b, b"1234567").unwrap();
    assert_eq!(api.meter().usage_of(a), 0);
    assert_eq!(api.meter().usage_of(b), BASE_ROW_FEE as i64 + 7);

    // An unset payer keeps the current one.
    api.db_update_i64(h, Name::EMPTY, b"123").unwrap();
    assert_eq!(api.meter().usage_of(b), BASE_ROW_FEE as i64 + 3);
}

#[test]
fn empty_tables_vanish_and_their_end_handles_survive() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let h = api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    let end = api.db_end_i64(a, a, t).unwrap();
    api.db_remove_i64(h).unwrap();

    // Descriptor gone with its last row.
    assert_eq!(api.db_end_i64(a, a, t).unwrap(), -1);
    assert_eq!(api.db_find_i64(a, a, t, 5).unwrap(), -1);
    // The end handle still decodes; backing off it finds nothing.
    let mut primary = 0;
    assert_eq!(api.db_previous_i64(end, &mut primary).unwrap(), -1);
    // The dead handle stays dead even after the table is recreated.
    api.db_store_i64(a, t, a, 7, b"again").unwrap();
    assert!(matches!(api.db_get_i64(h, &mut []), Err(DbError::InvalidHandle(_))));
}

#[test]
fn secondary_store_requires_the_primary_row() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let err = api.db_idx64_store(a, t, a, 5, 100).unwrap_err();
    assert!(matches!(err, DbError::MissingRow { primary: 5, .. }));
}

#[test]
fn idx256_checks_the_limb_count() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    api.db_store_i64(a, t, a, 1, b"x").unwrap();
    let err = api.db_idx256_store(a, t, a, 1, &[1u128]).unwrap_err();
    assert!(matches!(err, DbError::WrongIndexType { .. }));

    api.db_idx256_store(a, t, a, 1, &[0u128, 55]).unwrap();
    let mut out = [0u128; 2];
    let mut primary = 0;
    let found = api
        .db_idx256_lowerbound(a, a, t, &mut out, &mut primary)
        .unwrap();
    assert!(found >= 0);
    assert_eq!((out[0], out[1], primary), (0, 55, 1));
}

#[test]
fn double_index_orders_with_total_order() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("prices"));

    for (primary, key) in [(1u64, -2.5f64), (2, -0.0), (3, 0.0), (4, 7.25)] {
        api.db_store_i64(a, t, a, primary, b"p").unwrap();
        api.db_idx_double_store(a, t, a, primary, key).unwrap();
    }

    let mut key = f64::NEG_INFINITY;
    let mut primary = 0;
    let mut walked = Vec::new();
    let mut it = api
        .db_idx_double_lowerbound(a, a, t, &mut key, &mut primary)
        .unwrap();
    while it >= 0 {
        walked.push(primary);
        it = api.db_idx_double_next(it, &mut primary).unwrap();
    }
    // -0.0 sorts strictly below +0.0.
    assert_eq!(walked, vec![1, 2, 3, 4]);
}

#[test]
fn find_secondary_prefers_the_lowest_primary_on_ties() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    for primary in [8u64, 2, 5] {
        api.db_store_i64(a, t, a, primary, b"x").unwrap();
        api.db_idx64_store(a, t, a, primary, 77).unwrap();
    }
    let mut primary = 0;
    api.db_idx64_find_secondary(a, a, t, &77, &mut primary).unwrap();
    assert_eq!(primary, 2);
}

#[test]
fn navigation_closure_holds_between_neighbours() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    let mut handles = Vec::new();
    for primary in [2u64, 4, 6, 8] {
        handles.push(api.db_store_i64(a, t, a, primary, b"v").unwrap());
    }
    let mut primary = 0;
    for pair in handles.windows(2) {
        assert_eq!(api.db_next_i64(pair[0], &mut primary).unwrap(), pair[1]);
        assert_eq!(api.db_previous_i64(pair[1], &mut primary).unwrap(), pair[0]);
    }
    // Boundary rule: last -> end -> last.
    let last = *handles.last().unwrap();
    let end = api.db_next_i64(last, &mut primary).unwrap();
    assert_eq!(end, -2);
    assert_eq!(api.db_previous_i64(end, &mut primary).unwrap(), last);
}

#[test]
fn checktime_aborts_once_the_budget_is_gone() {
    let mut store = StateStore::new();
    let receiver = name("alice");
    let tx = store.begin_mut_tx();
    let mut api = DatabaseApi::new(
        tx,
        receiver,
        Action::default(),
        TrxContext::default(),
        ResourceMeter::new(CpuUnits(100)),
    );
    api.checktime(99).unwrap();
    assert_eq!(
        api.checktime(2),
        Err(DbError::BudgetExceeded(Resource::Cpu))
    );
}

#[test]
fn rollback_discards_everything_an_action_did() {
    let mut store = StateStore::new();
    store.create_account(name("alice"));
    let before = store.clone();

    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));
    let h = api.db_store_i64(a, t, a, 5, b"hello").unwrap();
    api.db_idx64_store(a, t, a, 5, 100).unwrap();
    api.db_update_i64(h, a, b"changed").unwrap();
    let (tx, _, _) = api.finish();
    tx.rollback();

    assert_eq!(store, before);
}

#[test]
fn authorization_surface_is_tracked_per_action() {
    let mut store = StateStore::new();
    store.create_account(name("alice"));
    let mut api = api(&mut store, "alice");

    assert!(api.has_auth(name("alice")));
    assert!(!api.all_authorizations_used());
    api.require_auth(name("alice")).unwrap();
    assert!(api.all_authorizations_used());
    assert!(api.unused_authorizations().is_empty());
    assert_eq!(
        api.require_auth(name("mallory")),
        Err(DbError::MissingAuth {
            actor: name("mallory"),
            permission: None
        })
    );

    assert!(api.is_account(name("alice")));
    assert!(!api.is_account(name("mallory")));

    assert!(api.has_recipient(name("alice")));
    api.require_recipient(name("watcher"));
    api.require_recipient(name("watcher"));
    assert_eq!(api.gate().recipients(), &[name("alice"), name("watcher")]);
}

#[test]
fn replays_produce_identical_state_results_and_metering() {
    let run = || {
        let mut store = StateStore::new();
        let mut api = api(&mut store, "alice");
        let (a, t) = (name("alice"), name("tokens"));
        for primary in [5u64, 3, 9] {
            api.db_store_i64(a, t, a, primary, b"v").unwrap();
        }
        api.db_idx_double_store(a, t, a, 5, 2.5).unwrap();
        api.console().append("sum ");
        api.console().append_f64(F64Bits::from_f64(0.1 + 0.2));
        let (tx, results, meter) = api.finish();
        tx.commit();
        (store, results, meter)
    };
    let (store_a, results_a, meter_a) = run();
    let (store_b, results_b, meter_b) = run();
    assert_eq!(store_a, store_b);
    assert_eq!(results_a, results_b);
    assert_eq!(meter_a, meter_b);
}

#[test]
fn secondary_indexes_navigate_in_primary_order_too() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");
    let (a, t) = (name("alice"), name("tokens"));

    for (primary, key) in [(1u64, 30u64), (2, 20), (3, 10)] {
        api.db_store_i64(a, t, a, primary, b"r").unwrap();
        api.db_idx64_store(a, t, a, primary, key).unwrap();
    }

    let mut primary = 0;
    let first = api.idx_lowerbound_primary::<u64>(a, a, t, 0).unwrap();
    let second = api.idx_next_primary::<u64>(first, &mut primary).unwrap();
    assert_eq!(primary, 2);
    let third = api.idx_next_primary::<u64>(second, &mut primary).unwrap();
    assert_eq!(primary, 3);
    let end = api.idx_next_primary::<u64>(third, &mut primary).unwrap();
    assert_eq!(end, -2);
    assert_eq!(api.idx_previous_primary::<u64>(end, &mut primary).unwrap(), third);
    assert_eq!(api.idx_upperbound_primary::<u64>(a, a, t, 1).unwrap(), second);
    assert_eq!(api.idx_previous_primary::<u64>(first, &mut primary).unwrap(), -1);

    // Primary-order lookup hands the secondary key back.
    let mut key = 0u64;
    let found = api.db_idx64_find_primary(a, a, t, &mut key, 2).unwrap();
    assert_eq!((found, key), (second, 20));
}

#[test]
fn action_context_flows_through_the_api() {
    let mut store = StateStore::new();
    let act = Action {
        account: name("exchange"),
        name: name("deposit"),
        authorization: vec![],
        data: vec![9, 9],
    };
    let trx = TrxContext {
        actions: vec![act.clone()],
        context_free_actions: Vec::new(),
        context_free_data: vec![vec![1, 2, 3]],
        packed_trx: vec![0xaa],
        active_producers: vec![name("prod.a"), name("prod.b")],
    };
    let tx = store.begin_mut_tx();
    let mut api = DatabaseApi::new(
        tx,
        name("exchange"),
        act.clone(),
        trx,
        ResourceMeter::new(CpuUnits(1000)),
    )
    .context_free();

    let mut buf = vec![0u8; 64];
    let len = api.get_action(1, 0, &mut buf);
    assert_eq!(&buf[..len as usize], act.pack().as_slice());
    assert_eq!(api.get_action(1, 5, &mut buf), -1);
    assert_eq!(api.get_action(7, 0, &mut buf), -1);

    let len = api.get_context_free_data(0, &mut buf);
    assert_eq!((len, &buf[..3]), (3, &[1u8, 2, 3][..]));
    assert!(api.used_context_free_api());
    assert_eq!(api.get_active_producers(), &[name("prod.a"), name("prod.b")]);
    assert_eq!(api.get_packed_transaction(), &[0xaa]);

    api.console().append("deposited ");
    api.console().append(99u64);
    let (tx, results, _) = api.finish();
    tx.commit();
    assert_eq!(results.applied_actions.len(), 1);
    assert_eq!(results.applied_actions[0].receiver, name("exchange"));
    assert_eq!(results.applied_actions[0].console, "deposited 99");
}

#[test]
fn inline_and_deferred_requests_accumulate_in_order() {
    let mut store = StateStore::new();
    let mut api = api(&mut store, "alice");

    api.execute_inline(Action {
        account: name("other"),
        ..Default::default()
    });
    api.execute_context_free_inline(Action::default());
    assert_eq!(api.inline_actions().len(), 1);
    assert_eq!(api.cfa_inline_actions().len(), 1);

    api.send_deferred(DeferredTransaction {
        sender: name("alice"),
        sender_id: 1,
        payer: name("alice"),
        delay_sec: 0,
        actions: Vec::new(),
    });
    api.cancel_deferred(DeferredReference {
        sender: name("alice"),
        sender_id: 1,
    });

    let (tx, results, _) = api.finish();
    tx.rollback();
    assert_eq!(results.deferred_transactions_count, 1);
    assert_eq!(results.deferred_transaction_requests.len(), 2);
}

proptest! {
    /// Random single-table workloads keep billing conserved, keep every
    /// secondary entry backed by a primary row, and keep issued handles
    /// stable.
    #[test]
    fn prop_invariants_hold_across_random_workloads(
        ops in proptest::collection::vec(
            (0u64..24, proptest::collection::vec(any::<u8>(), 0..6), 0u8..4),
            1..60,
        )
    ) {
        let mut store = StateStore::new();
        let mut api = api(&mut store, "alice");
        let (a, t) = (name("alice"), name("tokens"));
        let mut issued: Vec<(i32, u64)> = Vec::new();

        for (id, value, op) in ops {
            match op {
                // Store a row (and remember its handle).
                0 => {
                    if let Ok(h) = api.db_store_i64(a, t, a, id, &value) {
                        issued.push((h, id));
                    }
                }
                // Give it a u64 secondary key.
                1 => {
                    let _ = api.db_idx64_store(a, t, a, id, id * 7);
                }
                // Update through the row's handle, if it still resolves.
                2 => {
                    let h = api.db_find_i64(a, a, t, id).unwrap();
                    if h >= 0 {
                        api.db_update_i64(h, a, &value).unwrap();
                    }
                }
                // Remove through the row's handle.
                _ => {
                    let h = api.db_find_i64(a, a, t, id).unwrap();
                    if h >= 0 {
                        api.db_remove_i64(h).unwrap();
                    }
                }
            }
        }

        // Billing conservation.
        let state = api.transaction().state();
        prop_assert_eq!(api.meter().total_usage(), expected_usage(state));

        // Every secondary entry is backed by a primary row.
        for (row, _) in state.secondary::<u64>().entries() {
            prop_assert!(state.row(row).is_some());
        }

        // Handle stability: an issued handle resolves to the same row or
        // fails deterministically.
        for &(h, id) in &issued {
            match api.db_get_i64(h, &mut []) {
                Ok(_) => {
                    let again = api.db_find_i64(a, a, t, id).unwrap();
                    prop_assert_eq!(again, h);
                }
                Err(err) => prop_assert!(matches!(err, DbError::InvalidHandle(_))),
            }
        }
    }
}
