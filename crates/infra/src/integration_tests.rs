//! Integration tests for the full pipeline.
//!
//! Tests: Action → ChangeSet → Store → Audit Log → Projection
//!
//! Verifies:
//! - Replaying the log's stock deltas reproduces live stock
//! - The outstanding view follows checkouts and returns
//! - Tenant isolation is preserved

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use stockroom_audit::{IncidentKind, LoanContext, TransactionType};
    use stockroom_auth::{Principal, Role};
    use stockroom_core::{Actor, Barcode, TenantId};
    use stockroom_inventory::{KitComponent, KitDefinition, NewItem};

    use crate::coordinator::{
        CartLine, CheckinRequest, CheckoutRequest, IncidentRequest, KitCheckoutRequest, KitReturn,
        ProjectCheckinRequest, TransactionCoordinator, TransferRequest,
    };
    use crate::store::InMemoryInventoryStore;

    fn bc(raw: &str) -> Barcode {
        Barcode::parse(raw).unwrap()
    }

    fn admin(tenant: TenantId) -> Principal {
        Principal::new(Actor::new("admin", "admin@school.org"), tenant, Role::Admin)
    }

    fn staff(tenant: TenantId) -> Principal {
        Principal::new(Actor::new("staff", "staff@school.org"), tenant, Role::Standard)
    }

    fn cart(entries: &[(&str, u32)]) -> Vec<CartLine> {
        entries.iter().map(|(b, q)| CartLine::new(bc(b), *q)).collect()
    }

    fn new_item(barcode: &str, name: &str, total: u32) -> NewItem {
        NewItem {
            barcode: Some(bc(barcode)),
            name: name.into(),
            total_stock: total,
            ..NewItem::default()
        }
    }

    async fn setup() -> (TransactionCoordinator<InMemoryInventoryStore>, TenantId) {
        let tenant = TenantId::new();
        let coordinator = TransactionCoordinator::new(InMemoryInventoryStore::new());
        coordinator
            .import_items(
                tenant,
                &admin(tenant),
                vec![
                    new_item("ARD-0001", "Arduino", 10),
                    new_item("TRI-0001", "Tripod", 6),
                    new_item("CAM-0001", "Camera", 3),
                ],
            )
            .await
            .unwrap();
        coordinator
            .save_kit(
                tenant,
                &admin(tenant),
                KitDefinition {
                    name: "Camera Rig".into(),
                    kit_barcode: None,
                    kit_quantity: 1,
                    components: vec![
                        KitComponent {
                            barcode: bc("TRI-0001"),
                            name: String::new(),
                            required_quantity: 2,
                        },
                        KitComponent {
                            barcode: bc("CAM-0001"),
                            name: String::new(),
                            required_quantity: 1,
                        },
                    ],
                },
            )
            .await
            .unwrap();
        (coordinator, tenant)
    }

    async fn mixed_history(coordinator: &TransactionCoordinator<InMemoryInventoryStore>, tenant: TenantId) {
        let who = staff(tenant);
        coordinator
            .checkout(
                tenant,
                &who,
                CheckoutRequest {
                    assignee: "Jane Doe".into(),
                    items: cart(&[("ARD-0001", 4)]),
                    context: LoanContext::default(),
                },
            )
            .await
            .unwrap();
        coordinator
            .kit_checkout(
                tenant,
                &who,
                KitCheckoutRequest {
                    kit_name: "Camera Rig".into(),
                    num_kits: 2,
                    assignee: "Film Club".into(),
                    context: LoanContext::default(),
                },
            )
            .await
            .unwrap();
        coordinator
            .checkin(
                tenant,
                &who,
                CheckinRequest {
                    items: cart(&[("ARD-0001", 1)]),
                    returned_by: Some("Jane Doe".into()),
                    notes: None,
                },
            )
            .await
            .unwrap();
        coordinator
            .report_incident(
                tenant,
                &who,
                IncidentRequest {
                    incident: IncidentKind::Lost,
                    items: cart(&[("ARD-0001", 1)]),
                    notes: Some("left on the bus".into()),
                },
            )
            .await
            .unwrap();
        coordinator
            .transfer(
                tenant,
                &who,
                TransferRequest {
                    barcodes: vec![bc("ARD-0001")],
                    to_department: "Physics".into(),
                    room: Some("B12".into()),
                    location: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replayed_stock_deltas_match_live_stock() {
        let (coordinator, tenant) = setup().await;
        mixed_history(&coordinator, tenant).await;

        let log = coordinator.audit_log(tenant).await.unwrap();
        let mut current: HashMap<Barcode, i64> = HashMap::new();
        let mut total: HashMap<Barcode, i64> = HashMap::new();
        for record in &log {
            for line in record.lines() {
                *current.entry(line.barcode.clone()).or_default() += line.stock_delta;
                *total.entry(line.barcode.clone()).or_default() += line.total_delta;
            }
        }

        for item in coordinator.list_items(tenant).await.unwrap() {
            assert_eq!(current.get(&item.barcode).copied(), Some(i64::from(item.current_stock)));
            assert_eq!(total.get(&item.barcode).copied(), Some(i64::from(item.total_stock)));
            item.check_invariants().unwrap();
        }

        let sequences: Vec<u64> = log.iter().map(|r| r.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn outstanding_view_follows_loans_and_returns() {
        let (coordinator, tenant) = setup().await;
        mixed_history(&coordinator, tenant).await;

        let outstanding = coordinator.outstanding(tenant).await.unwrap();
        let by_barcode: HashMap<&str, _> = outstanding.iter().map(|o| (o.barcode.as_str(), o)).collect();

        assert_eq!(by_barcode["ARD-0001"].quantity, 3);
        assert_eq!(by_barcode["ARD-0001"].holder, "Jane Doe");
        assert_eq!(by_barcode["TRI-0001"].quantity, 4);
        assert_eq!(by_barcode["CAM-0001"].quantity, 2);
        assert_eq!(by_barcode["TRI-0001"].batch_id, by_barcode["CAM-0001"].batch_id);
        assert_eq!(by_barcode["CAM-0001"].kit_name.as_deref(), Some("Camera Rig"));

        let kit_batch = by_barcode["CAM-0001"].batch_id;
        coordinator
            .project_checkin(
                tenant,
                &staff(tenant),
                ProjectCheckinRequest {
                    project: "Short Film".into(),
                    items: Vec::new(),
                    kit: Some(KitReturn {
                        kit_name: "Camera Rig".into(),
                        num_kits: 2,
                    }),
                    checkout_batch: kit_batch,
                },
            )
            .await
            .unwrap();

        let outstanding = coordinator.outstanding(tenant).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].barcode, bc("ARD-0001"));

        let log = coordinator.audit_log(tenant).await.unwrap();
        let project_rows: Vec<_> = log
            .iter()
            .filter(|r| r.transaction_type() == TransactionType::ProjectCheckIn)
            .collect();
        assert_eq!(project_rows.len(), 2);
        assert!(project_rows.iter().all(|r| r.batch_id == project_rows[0].batch_id));
    }

    #[tokio::test]
    async fn tenants_never_see_each_other() {
        let coordinator = Arc::new(TransactionCoordinator::new(InMemoryInventoryStore::new()));
        let (a, b) = (TenantId::new(), TenantId::new());
        for tenant in [a, b] {
            coordinator
                .create_item(tenant, &admin(tenant), new_item("ARD-0001", "Arduino", 5))
                .await
                .unwrap();
        }

        coordinator
            .checkout(
                a,
                &staff(a),
                CheckoutRequest {
                    assignee: "Jane".into(),
                    items: cart(&[("ARD-0001", 5)]),
                    context: LoanContext::default(),
                },
            )
            .await
            .unwrap();

        assert_eq!(coordinator.find_item(a, &bc("ARD-0001")).await.unwrap().current_stock, 0);
        assert_eq!(coordinator.find_item(b, &bc("ARD-0001")).await.unwrap().current_stock, 5);
        assert_eq!(coordinator.audit_log(a).await.unwrap().len(), 2);
        assert_eq!(coordinator.audit_log(b).await.unwrap().len(), 1);
        assert!(coordinator.outstanding(b).await.unwrap().is_empty());

        // Tenant A's staff cannot act on tenant B.
        let err = coordinator
            .checkout(
                b,
                &staff(a),
                CheckoutRequest {
                    assignee: "Jane".into(),
                    items: cart(&[("ARD-0001", 1)]),
                    context: LoanContext::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::coordinator::EngineError::PermissionDenied(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_never_oversell() {
        let (coordinator, tenant) = setup().await;
        let coordinator = Arc::new(coordinator);

        let mut handles = Vec::new();
        for i in 0..16 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .checkout(
                        tenant,
                        &staff(tenant),
                        CheckoutRequest {
                            assignee: format!("Student {i}"),
                            items: cart(&[("ARD-0001", 1)]),
                            context: LoanContext::default(),
                        },
                    )
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        let item = coordinator.find_item(tenant, &bc("ARD-0001")).await.unwrap();
        assert_eq!(i64::from(item.current_stock), 10 - succeeded);
        let checkouts = coordinator
            .audit_log(tenant)
            .await
            .unwrap()
            .iter()
            .filter(|r| r.transaction_type() == TransactionType::CheckOut)
            .count();
        assert_eq!(checkouts as i64, succeeded);
    }
}
