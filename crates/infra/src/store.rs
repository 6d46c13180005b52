//! The transactional store backing every workflow operation.
//!
//! One [`Transaction`] is the unit of atomicity: an operation snapshots the
//! tables, reads and mutates working copies, and commits everything at once.
//! Every row read or written is tracked with the version it was observed at;
//! commit re-checks those versions under the write lock and fails with a
//! conflict when another writer got there first. [`MemoryStore::transact`]
//! wraps that in a bounded retry loop, so the product read-modify-write at
//! the heart of ledger posting cannot lose updates.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use thiserror::Error;

use tallyerp_core::{ExpectedVersion, SoftDeletable};
use tallyerp_inventory::StockMovement;
use tallyerp_parties::{Party, PartyId};
use tallyerp_products::{Product, ProductId};
use tallyerp_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderReturn, PurchaseOrderReturnId};
use tallyerp_sales::{SalesOrder, SalesOrderId};

/// Store-level failure. Business rules never surface here; this is purely
/// the transactional machinery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row changed between snapshot and commit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store itself broke (poisoned lock). Not retryable.
    #[error("store fault: {0}")]
    Fault(String),
}

#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    row: T,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    products: HashMap<ProductId, Versioned<Product>>,
    parties: HashMap<PartyId, Versioned<Party>>,
    sales_orders: HashMap<SalesOrderId, Versioned<SalesOrder>>,
    purchase_orders: HashMap<PurchaseOrderId, Versioned<PurchaseOrder>>,
    purchase_returns: HashMap<PurchaseOrderReturnId, Versioned<PurchaseOrderReturn>>,
    /// Reference counters ("SO", "PO", ...), versioned like any other row so
    /// number reservation participates in conflict detection.
    sequences: HashMap<String, Versioned<u64>>,
    /// The stock ledger. Append-only; rows are never rewritten.
    movements: Vec<StockMovement>,
}

/// Versions observed by a transaction, keyed per table. Version 0 means the
/// row was read as absent and must still be absent at commit.
#[derive(Debug, Default)]
struct Observed {
    products: HashMap<ProductId, u64>,
    parties: HashMap<PartyId, u64>,
    sales_orders: HashMap<SalesOrderId, u64>,
    purchase_orders: HashMap<PurchaseOrderId, u64>,
    purchase_returns: HashMap<PurchaseOrderReturnId, u64>,
    sequences: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct Dirty {
    products: HashSet<ProductId>,
    parties: HashSet<PartyId>,
    sales_orders: HashSet<SalesOrderId>,
    purchase_orders: HashSet<PurchaseOrderId>,
    purchase_returns: HashSet<PurchaseOrderReturnId>,
    sequences: HashSet<String>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Not optimized for performance: transactions
/// snapshot the full table set at begin.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction over a consistent snapshot of the tables.
    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        let snapshot = self
            .tables
            .read()
            .map_err(|_| StoreError::Fault("store lock poisoned".to_string()))?
            .clone();

        Ok(Transaction {
            store: self,
            snapshot,
            observed: Observed::default(),
            dirty: Dirty::default(),
            appended: Vec::new(),
        })
    }

    /// Run `op` inside a transaction, retrying on commit conflicts.
    ///
    /// `op` may run more than once; it must derive everything from the
    /// transaction it is handed. Errors returned by `op` abort without
    /// retrying (business failures are not contention). After `retries`
    /// conflicting commits the conflict is surfaced to the caller.
    pub fn transact<T, E, F>(&self, retries: u32, op: F) -> Result<T, E>
    where
        F: Fn(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut attempts = 0;
        loop {
            let mut tx = match self.begin() {
                Ok(tx) => tx,
                Err(e) => return Err(E::from(e)),
            };
            let value = op(&mut tx)?;
            match tx.commit() {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict(reason)) if attempts < retries => {
                    attempts += 1;
                    tracing::debug!(attempt = attempts, %reason, "commit conflict, retrying");
                }
                Err(e) => return Err(E::from(e)),
            }
        }
    }

    /// Raw row read, deleted rows included (audit/assertion use).
    pub fn product(&self, id: ProductId) -> Option<Product> {
        let tables = self.tables.read().ok()?;
        tables.products.get(&id).map(|v| v.row.clone())
    }

    pub fn party(&self, id: PartyId) -> Option<Party> {
        let tables = self.tables.read().ok()?;
        tables.parties.get(&id).map(|v| v.row.clone())
    }

    pub fn sales_order(&self, id: SalesOrderId) -> Option<SalesOrder> {
        let tables = self.tables.read().ok()?;
        tables.sales_orders.get(&id).map(|v| v.row.clone())
    }

    pub fn purchase_order(&self, id: PurchaseOrderId) -> Option<PurchaseOrder> {
        let tables = self.tables.read().ok()?;
        tables.purchase_orders.get(&id).map(|v| v.row.clone())
    }

    pub fn purchase_return(&self, id: PurchaseOrderReturnId) -> Option<PurchaseOrderReturn> {
        let tables = self.tables.read().ok()?;
        tables.purchase_returns.get(&id).map(|v| v.row.clone())
    }

    /// A product's slice of the ledger, in append order.
    pub fn movements_for(&self, product_id: ProductId) -> Vec<StockMovement> {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .movements
                    .iter()
                    .filter(|m| m.product_id() == product_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn movement_count(&self) -> usize {
        self.tables.read().map(|t| t.movements.len()).unwrap_or(0)
    }
}

macro_rules! row_accessors {
    ($field:ident, $Id:ty, $Row:ty, $get:ident, $get_any:ident, $put:ident) => {
        /// Read a live row; soft-deleted rows read as absent.
        pub fn $get(&mut self, id: $Id) -> Option<$Row> {
            self.$get_any(id).filter(|row| !row.is_deleted())
        }

        /// Read a row regardless of its soft-delete flag (restore/audit).
        pub fn $get_any(&mut self, id: $Id) -> Option<$Row> {
            let version = self.snapshot.$field.get(&id).map(|v| v.version).unwrap_or(0);
            self.observed.$field.entry(id).or_insert(version);
            self.snapshot.$field.get(&id).map(|v| v.row.clone())
        }

        /// Stage a row write. Visible to later reads in this transaction;
        /// persisted only at commit.
        pub fn $put(&mut self, row: $Row) {
            let id = row.id_typed();
            let version = self.snapshot.$field.get(&id).map(|v| v.version).unwrap_or(0);
            self.observed.$field.entry(id).or_insert(version);
            self.dirty.$field.insert(id);
            self.snapshot.$field.insert(id, Versioned { version, row });
        }
    };
}

/// One unit of atomicity: snapshot reads, staged writes, all-or-nothing
/// commit. Dropping a transaction without committing discards everything.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a MemoryStore,
    snapshot: Tables,
    observed: Observed,
    dirty: Dirty,
    appended: Vec<StockMovement>,
}

impl Transaction<'_> {
    row_accessors!(products, ProductId, Product, product, product_any, put_product);
    row_accessors!(parties, PartyId, Party, party, party_any, put_party);
    row_accessors!(sales_orders, SalesOrderId, SalesOrder, sales_order, sales_order_any, put_sales_order);
    row_accessors!(
        purchase_orders,
        PurchaseOrderId,
        PurchaseOrder,
        purchase_order,
        purchase_order_any,
        put_purchase_order
    );
    row_accessors!(
        purchase_returns,
        PurchaseOrderReturnId,
        PurchaseOrderReturn,
        purchase_return,
        purchase_return_any,
        put_purchase_return
    );

    /// All live returns opened against one purchase order.
    ///
    /// Every row returned is version-tracked, so a sibling changing state
    /// between here and commit fails the commit.
    pub fn returns_for_order(&mut self, order_id: PurchaseOrderId) -> Vec<PurchaseOrderReturn> {
        let mut rows: Vec<PurchaseOrderReturn> = self
            .snapshot
            .purchase_returns
            .values()
            .filter(|v| v.row.purchase_order_id() == order_id && !v.row.is_deleted())
            .map(|v| v.row.clone())
            .collect();
        rows.sort_by_key(|r| r.created_at());

        for row in &rows {
            let id = row.id_typed();
            let version = self
                .snapshot
                .purchase_returns
                .get(&id)
                .map(|v| v.version)
                .unwrap_or(0);
            self.observed.purchase_returns.entry(id).or_insert(version);
        }
        rows
    }

    /// Stage an appended ledger row. The ledger is append-only; a committed
    /// movement is never rewritten.
    pub fn append_movement(&mut self, movement: StockMovement) {
        self.appended.push(movement);
    }

    /// A product's slice of the ledger as of this snapshot, including rows
    /// appended by this transaction.
    pub fn movements_for(&self, product_id: ProductId) -> Vec<StockMovement> {
        self.snapshot
            .movements
            .iter()
            .chain(self.appended.iter())
            .filter(|m| m.product_id() == product_id)
            .cloned()
            .collect()
    }

    /// Reserve the next number in a sequence, e.g. `next_reference("SO")`
    /// yields `SO-000001`. The counter is a versioned row; a concurrent
    /// reservation of the same sequence conflicts at commit, which keeps
    /// generated numbers unique.
    pub fn next_reference(&mut self, prefix: &str) -> String {
        let versioned = self.snapshot.sequences.get(prefix);
        let version = versioned.map(|v| v.version).unwrap_or(0);
        let next = versioned.map(|v| v.row).unwrap_or(0) + 1;

        self.observed
            .sequences
            .entry(prefix.to_string())
            .or_insert(version);
        self.dirty.sequences.insert(prefix.to_string());
        self.snapshot
            .sequences
            .insert(prefix.to_string(), Versioned { version, row: next });

        format!("{prefix}-{next:06}")
    }

    /// Validate every observed version and persist staged writes atomically.
    pub fn commit(self) -> Result<(), StoreError> {
        let mut tables = self
            .store
            .tables
            .write()
            .map_err(|_| StoreError::Fault("store lock poisoned".to_string()))?;

        check_versions(&tables.products, &self.observed.products, "product")?;
        check_versions(&tables.parties, &self.observed.parties, "party")?;
        check_versions(&tables.sales_orders, &self.observed.sales_orders, "sales order")?;
        check_versions(
            &tables.purchase_orders,
            &self.observed.purchase_orders,
            "purchase order",
        )?;
        check_versions(
            &tables.purchase_returns,
            &self.observed.purchase_returns,
            "purchase return",
        )?;
        check_versions(&tables.sequences, &self.observed.sequences, "sequence")?;

        apply_writes(&mut tables.products, &self.snapshot.products, &self.dirty.products);
        apply_writes(&mut tables.parties, &self.snapshot.parties, &self.dirty.parties);
        apply_writes(
            &mut tables.sales_orders,
            &self.snapshot.sales_orders,
            &self.dirty.sales_orders,
        );
        apply_writes(
            &mut tables.purchase_orders,
            &self.snapshot.purchase_orders,
            &self.dirty.purchase_orders,
        );
        apply_writes(
            &mut tables.purchase_returns,
            &self.snapshot.purchase_returns,
            &self.dirty.purchase_returns,
        );
        apply_writes(&mut tables.sequences, &self.snapshot.sequences, &self.dirty.sequences);

        tables.movements.extend(self.appended);
        Ok(())
    }
}

fn check_versions<K, V>(
    current: &HashMap<K, Versioned<V>>,
    observed: &HashMap<K, u64>,
    what: &str,
) -> Result<(), StoreError>
where
    K: Eq + std::hash::Hash + core::fmt::Display,
{
    for (id, &seen) in observed {
        let now = current.get(id).map(|v| v.version).unwrap_or(0);
        if !ExpectedVersion::Exact(seen).matches(now) {
            return Err(StoreError::Conflict(format!(
                "{what} {id} changed (read v{seen}, now v{now})"
            )));
        }
    }
    Ok(())
}

fn apply_writes<K, V>(
    current: &mut HashMap<K, Versioned<V>>,
    staged: &HashMap<K, Versioned<V>>,
    dirty: &HashSet<K>,
) where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    for id in dirty {
        if let Some(v) = staged.get(id) {
            current.insert(
                id.clone(),
                Versioned {
                    version: v.version + 1,
                    row: v.row.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tallyerp_core::EntityId;

    fn test_product() -> Product {
        Product::new(
            ProductId::new(EntityId::new()),
            "SKU-001",
            "Widget",
            250,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    fn seed_product(store: &MemoryStore) -> ProductId {
        let product = test_product();
        let id = product.id_typed();
        let mut tx = store.begin().unwrap();
        tx.put_product(product);
        tx.commit().unwrap();
        id
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let store = MemoryStore::new();
        let id = seed_product(&store);

        let mut tx = store.begin().unwrap();
        assert!(tx.product(id).is_some());
        assert!(tx.product(ProductId::new(EntityId::new())).is_none());
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();

        {
            let mut tx = store.begin().unwrap();
            tx.put_product(test_product());
            tx.next_reference("SO");
            // no commit
        }

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.next_reference("SO"), "SO-000001");
    }

    #[test]
    fn stale_read_fails_commit() {
        let store = MemoryStore::new();
        let id = seed_product(&store);

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();

        let mut row = first.product(id).unwrap();
        row.commit_stock_level(5, Utc::now()).unwrap();
        first.put_product(row);
        first.commit().unwrap();

        // Second read the same row before the first committed.
        let mut row = second.product(id).unwrap();
        row.commit_stock_level(7, Utc::now()).unwrap();
        second.put_product(row);
        let err = second.commit().unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.product(id).unwrap().current_stock(), 5);
    }

    #[test]
    fn read_as_absent_must_stay_absent() {
        let store = MemoryStore::new();
        let probe = test_product();
        let id = probe.id_typed();

        let mut second = store.begin().unwrap();
        assert!(second.product(id).is_none());

        let mut first = store.begin().unwrap();
        first.put_product(probe);
        first.commit().unwrap();

        let err = second.commit().unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn transact_retries_through_conflicts() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let id = seed_product(&store);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .transact(64, |tx| {
                                let mut product = tx.product(id).expect("seeded");
                                let next = product.current_stock() + 1;
                                product.commit_stock_level(next, Utc::now()).unwrap();
                                tx.put_product(product);
                                Ok::<_, StoreError>(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(store.product(id).unwrap().current_stock(), 100);
    }

    #[test]
    fn business_errors_abort_without_retry() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let store = MemoryStore::new();
        let calls = AtomicU32::new(0);

        let err: StoreError = store
            .transact(8, |_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Fault("boom".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Fault(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequences_stay_unique_under_contention() {
        use std::collections::HashSet;
        use std::sync::{Arc, Mutex};

        let store = Arc::new(MemoryStore::new());
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let seen = seen.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let reference = store
                            .transact(64, |tx| Ok::<_, StoreError>(tx.next_reference("PO")))
                            .unwrap();
                        assert!(seen.lock().unwrap().insert(reference));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(seen.lock().unwrap().len(), 80);
    }
}
