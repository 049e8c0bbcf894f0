//! Property-Based Tests for Section and Page Invalidation
//!
//! - Deleting or expiring any section member removes every member
//! - Pages of one size share a section with the dataset total
//! - Sections never leak across namespaces

use std::time::Duration;

use proptest::prelude::*;
use utilkits_cache::{Expiration, Page};
use utilkits_test_utils::{
    assertions::{assert_absent, assert_key_names, assert_present},
    fixtures::{isolated_store, order_page, OrderRow},
    generators::{arb_base_name, arb_page_coords},
};

// ============================================================================
// SECTIONS
// ============================================================================

#[test]
fn test_deleting_one_member_clears_section() {
    let fixture = isolated_store("reports");
    let members: Vec<_> = ["daily", "weekly", "monthly"]
        .iter()
        .map(|name| {
            fixture
                .store
                .section::<u64>(*name, "sales")
                .expect("member key should be valid")
        })
        .collect();
    for (i, member) in members.iter().enumerate() {
        member.set(i as u64).expect("set should succeed");
    }
    assert_key_names(
        &members[0].members().expect("members should succeed"),
        &["daily", "weekly", "monthly"],
    );

    members[1].delete().expect("delete should succeed");

    for member in &members {
        assert_absent(member.exists());
    }
    assert!(members[0]
        .members()
        .expect("members should succeed")
        .is_empty());
    assert!(fixture.table.is_empty());
}

#[test]
fn test_member_expiry_clears_section() {
    let fixture = isolated_store("reports");
    let short = fixture
        .store
        .section::<u64>("daily", "sales")
        .expect("member key should be valid")
        .with_expiration(Expiration::Absolute(Duration::from_secs(5)));
    let long = fixture
        .store
        .section::<u64>("weekly", "sales")
        .expect("member key should be valid");
    short.set(1u64).expect("set should succeed");
    long.set(2u64).expect("set should succeed");

    fixture.clock.advance(Duration::from_secs(6));
    fixture.table.purge_expired().expect("purge should succeed");

    assert_absent(short.exists());
    assert_absent(long.exists());
}

#[test]
fn test_sections_are_scoped_by_namespace() {
    let fixture = isolated_store("tenant-a");
    let other = utilkits_cache::CacheStore::with_table("tenant-b", fixture.table.clone())
        .expect("store should build");

    let a = fixture
        .store
        .section::<u64>("daily", "sales")
        .expect("member key should be valid");
    let b = other
        .section::<u64>("daily", "sales")
        .expect("member key should be valid");
    a.set(1u64).expect("set should succeed");
    b.set(2u64).expect("set should succeed");

    a.delete().expect("delete should succeed");

    assert_absent(a.exists());
    assert_present(b.exists());
    assert_eq!(b.get().expect("get should succeed"), Some(2));
}

#[test]
fn test_refreshing_member_invalidates_siblings() {
    let fixture = isolated_store("reports");
    let daily = fixture
        .store
        .section::<u64>("daily", "sales")
        .expect("member key should be valid");
    let weekly = fixture
        .store
        .section::<u64>("weekly", "sales")
        .expect("member key should be valid");
    daily.set(1u64).expect("set should succeed");
    weekly.set(7u64).expect("set should succeed");

    let refreshed = daily
        .get_with_refresh(|| 2u64, || Ok(true))
        .expect("refresh should succeed");

    assert_eq!(refreshed, Some(2));
    assert_absent(weekly.exists());
    assert_key_names(
        &daily.members().expect("members should succeed"),
        &["daily"],
    );
}

// ============================================================================
// PAGES
// ============================================================================

#[test]
fn test_orders_pages_share_total_and_section() {
    let fixture = isolated_store("shop");
    let pages: Vec<_> = (0..3)
        .map(|i| fixture.store.page::<Vec<OrderRow>>("orders", i, 10))
        .collect();

    for (i, page) in pages.iter().enumerate() {
        let Page { total, data } = page
            .get(|| (37, order_page(37, i as u32, 10)))
            .expect("get should succeed");
        assert_eq!(total, 37);
        assert_eq!(data, Some(order_page(37, i as u32, 10)));
    }

    let keys = pages[2].keys();
    assert_eq!(keys.page.name(), "orders_S10_P2");
    assert_eq!(keys.section.name(), "orders_S10");
    assert_eq!(keys.total.name(), "orders_S10_Total");
    assert_key_names(
        &pages[0].section().members().expect("members should succeed"),
        &["orders_S10_Total", "orders_S10_P0", "orders_S10_P1", "orders_S10_P2"],
    );

    pages[1].delete().expect("delete should succeed");
    for page in &pages {
        assert_absent(page.exists());
        assert_eq!(page.total().expect("total should succeed"), None);
    }
}

#[test]
fn test_page_hit_returns_cached_total() {
    let fixture = isolated_store("shop");
    let page = fixture.store.page::<Vec<OrderRow>>("orders", 0, 10);
    page.get(|| (37, order_page(37, 0, 10)))
        .expect("first get should succeed");

    let again = page
        .get(|| (99, order_page(99, 0, 10)))
        .expect("second get should succeed");
    assert_eq!(again.total, 37);
    assert_eq!(again.data, Some(order_page(37, 0, 10)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_page_keys_follow_naming(base in arb_base_name(), (index, size) in arb_page_coords()) {
        let fixture = isolated_store("props");
        let page = fixture.store.page::<Vec<OrderRow>>(&base, index, size);
        let keys = page.keys();

        prop_assert_eq!(keys.page.name(), format!("{}_S{}_P{}", base, size, index));
        prop_assert_eq!(keys.section.name(), format!("{}_S{}", base, size));
        prop_assert_eq!(keys.total.name(), format!("{}_S{}_Total", base, size));
    }

    #[test]
    fn prop_page_get_reports_populated_total(
        base in arb_base_name(),
        (index, size) in arb_page_coords(),
        total in 0u64..10_000,
    ) {
        let fixture = isolated_store("props");
        let page = fixture.store.page::<Vec<OrderRow>>(&base, index, size);
        let rows = order_page(total, index, size);
        let expected = if rows.is_empty() { None } else { Some(rows.clone()) };

        let result = page
            .get(|| (total, expected.clone()))
            .expect("get should succeed");

        prop_assert_eq!(result.total, total);
        prop_assert_eq!(result.data, expected);
    }
}
