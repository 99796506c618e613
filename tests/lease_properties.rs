// Random acquire/release/outage sequences against the in-memory coordinator.
//
// After every step the client must believe it holds the lease exactly when a
// maintainer task is running.

use leasehold::{test_utils::InMemoryCoordinator, LeaseClient, LeaseState};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    TryAcquire,
    Release,
    Wait(u64),
    Outage(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::TryAcquire),
        2 => Just(Op::Release),
        3 => (1u64..45).prop_map(Op::Wait),
        1 => any::<bool>().prop_map(Op::Outage),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn held_iff_maintaining(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let coordinator = InMemoryCoordinator::new(Duration::from_secs(30));
            let lease = LeaseClient::with_client(
                "prop",
                coordinator.connect(),
                Duration::from_secs(10),
            );

            for op in ops {
                let was_held = lease.is_held();
                match op {
                    Op::TryAcquire => match lease.acquire(false).await {
                        Ok(acquired) => {
                            prop_assert!(!was_held);
                            prop_assert_eq!(acquired, lease.is_held());
                        }
                        Err(err) => {
                            // Either re-entry or the outage
                            prop_assert_eq!(err.is_concurrency(), was_held);
                            prop_assert!(!err.is_concurrency() || lease.is_held());
                        }
                    },
                    Op::Release => match lease.release().await {
                        Ok(()) => {
                            prop_assert!(was_held);
                            prop_assert_eq!(lease.state(), LeaseState::Released);
                        }
                        Err(err) => {
                            prop_assert!(!was_held);
                            prop_assert!(err.is_concurrency());
                        }
                    },
                    Op::Wait(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    Op::Outage(down) => coordinator.set_unreachable(down),
                }

                prop_assert_eq!(lease.is_held(), lease.is_maintaining());
            }

            if lease.is_held() {
                lease.release().await.unwrap();
            }
            prop_assert!(!lease.is_maintaining());
            Ok(())
        })?;
    }
}
