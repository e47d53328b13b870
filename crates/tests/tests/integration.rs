//! End-to-end tests for the Conflux controller.
//!
//! These drive the full pipeline: parse → graph build → topological
//! evaluation → supervised execution → reactive re-evaluation.

use conflux_runtime::graph::NodeId;
use conflux_runtime::health::HealthLevel;
use conflux_runtime::node::Node;
use conflux_runtime::registry::Stability;
use conflux_runtime::LoadError;
use conflux_tests::TestHarness;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

/// Two cold loads of the same config produce identical graphs: same node
/// ids, same edges, same evaluation order.
#[tokio::test]
async fn test_cold_loads_are_deterministic() {
    let config = r#"
        testcomponents.passthrough "zeta" { input = 1 }
        testcomponents.passthrough "alpha" { input = testcomponents.passthrough.zeta.output }
        testcomponents.summation "total" { }

        declare "wrapper" {
            argument "value" { }
            export "out" { value = argument.value.value }
        }
        wrapper "w" { value = testcomponents.passthrough.alpha.output }
    "#;

    let first = TestHarness::start(config).await.unwrap();
    let second = TestHarness::start(config).await.unwrap();

    assert_eq!(first.controller.node_ids(), second.controller.node_ids());
    assert_eq!(first.controller.edges(), second.controller.edges());

    first.shutdown().await;
    second.shutdown().await;
}

/// Scenario: A exports a value, B reads it. After A publishes a new
/// value, B is updated exactly once with it.
#[tokio::test]
async fn test_export_propagation_updates_dependent_once() {
    let harness = TestHarness::start(
        r#"
        testcomponents.passthrough "a" { input = "x:1" }
        testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
        "#,
    )
    .await
    .unwrap();

    harness
        .wait_until(WAIT, |h| {
            h.export("testcomponents.passthrough.b", "output").is_some()
        })
        .await;
    assert_eq!(
        harness
            .export("testcomponents.passthrough.b", "output")
            .unwrap(),
        conflux_dsl::Value::String("x:1".into())
    );
    assert_eq!(
        harness.export_int("testcomponents.passthrough.b", "updates"),
        Some(0)
    );

    harness
        .load(
            r#"
            testcomponents.passthrough "a" { input = "y:2" }
            testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
            "#,
        )
        .await
        .unwrap();

    harness
        .wait_until(WAIT, |h| {
            h.export("testcomponents.passthrough.b", "output")
                == Some(conflux_dsl::Value::String("y:2".into()))
        })
        .await;
    // Exactly one in-place update; the worker was never replaced.
    assert_eq!(
        harness.export_int("testcomponents.passthrough.b", "updates"),
        Some(1)
    );

    harness.shutdown().await;
}

/// Reloading identical text performs zero updates and zero replacements.
#[tokio::test]
async fn test_identical_reload_is_a_no_op() {
    let config = r#"
        testcomponents.passthrough "a" { input = 5 }
        testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
    "#;
    let harness = TestHarness::start(config).await.unwrap();

    harness.load(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        harness.export_int("testcomponents.passthrough.a", "updates"),
        Some(0)
    );
    assert_eq!(
        harness.export_int("testcomponents.passthrough.b", "updates"),
        Some(0)
    );

    harness.shutdown().await;
}

/// Scenario: changing only comments and whitespace is a no-op.
#[tokio::test]
async fn test_comment_only_change_is_a_no_op() {
    let harness = TestHarness::start(
        "testcomponents.passthrough \"a\" { input = 5 }",
    )
    .await
    .unwrap();

    harness
        .load(
            r#"
            // a new comment
            testcomponents.passthrough "a" {
                # another comment
                input    = 5 /* inline */
            }
            "#,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        harness.export_int("testcomponents.passthrough.a", "updates"),
        Some(0)
    );

    harness.shutdown().await;
}

/// A cyclic config is rejected wholesale and the previous graph keeps
/// running unchanged.
#[tokio::test]
async fn test_cycle_rejected_and_previous_graph_survives() {
    let harness = TestHarness::start(
        r#"
        testcomponents.passthrough "a" { input = "stable" }
        testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
        "#,
    )
    .await
    .unwrap();

    let err = harness
        .load(
            r#"
            testcomponents.passthrough "a" { input = testcomponents.passthrough.b.output }
            testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
            "#,
        )
        .await
        .unwrap_err();
    match err {
        LoadError::Cycle(cycle) => {
            assert_eq!(cycle.path.first(), cycle.path.last());
            assert!(cycle.path.len() >= 3);
        }
        other => panic!("expected cycle error, got {}", other),
    }

    // Old graph untouched: same exports, same health, zero updates.
    assert_eq!(
        harness.export("testcomponents.passthrough.b", "output"),
        Some(conflux_dsl::Value::String("stable".into()))
    );
    assert_eq!(
        harness.export_int("testcomponents.passthrough.b", "updates"),
        Some(0)
    );

    harness.shutdown().await;
}

/// An unresolvable reference marks only that node unhealthy; the rest of
/// the graph loads and runs.
#[tokio::test]
async fn test_unknown_reference_is_isolated() {
    let harness = TestHarness::start(
        r#"
        testcomponents.passthrough "ok" { input = 1 }
        testcomponents.passthrough "broken" { input = missing.thing.value }
        "#,
    )
    .await
    .unwrap();

    let ok = harness.snapshot("testcomponents.passthrough.ok").unwrap();
    assert_eq!(ok.health.level, HealthLevel::Healthy);
    assert!(ok.exports.is_some());

    let broken = harness
        .snapshot("testcomponents.passthrough.broken")
        .unwrap();
    assert_eq!(broken.health.level, HealthLevel::Unhealthy);
    assert!(broken.health.message.contains("missing.thing.value"));

    // Health flows up: the aggregate is as bad as the worst node.
    assert_eq!(
        harness.controller.aggregate_health().level,
        HealthLevel::Unhealthy
    );

    harness.shutdown().await;
}

/// Components below the configured stability floor reject the load.
#[tokio::test]
async fn test_stability_floor_rejects_load() {
    let result = TestHarness::start_with(
        "testcomponents.experimental_noop \"x\" { }",
        |mut opts| {
            opts.min_stability = Stability::GenerallyAvailable;
            opts
        },
    )
    .await;

    match result {
        Err(LoadError::Stability { stability, floor, .. }) => {
            assert_eq!(stability, Stability::Experimental);
            assert_eq!(floor, Stability::GenerallyAvailable);
        }
        Ok(_) => panic!("expected stability error"),
        Err(other) => panic!("expected stability error, got {}", other),
    }
}

/// Scenario: `foreach` over `[5, 5]` instantiates two pulses that feed
/// one summation; the total reaches exactly 10.
#[tokio::test]
async fn test_foreach_with_integers_sums_to_ten() {
    let harness = TestHarness::start(
        r#"
        testcomponents.summation "total" { }

        foreach "pulses" {
            collection = [5, 5]
            var        = "num"

            template {
                testcomponents.pulse "p" {
                    max        = num
                    frequency  = 10ms
                    forward_to = [testcomponents.summation.total.receiver]
                }
            }
        }
        "#,
    )
    .await
    .unwrap();

    harness
        .wait_until(WAIT, |h| {
            h.export_int("testcomponents.summation.total", "sum") == Some(10)
        })
        .await;

    // The pulses are exhausted: the sum must not creep past 10.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        harness.export_int("testcomponents.summation.total", "sum"),
        Some(10)
    );

    harness.shutdown().await;
}

/// Scenario: foreach with an id field derives stable instance ids with
/// `_N` disambiguation.
#[tokio::test]
async fn test_foreach_id_field_instance_ids() {
    let harness = TestHarness::start(
        r#"
        foreach "named" {
            collection = [
                { ns = "dev",  b = 3 },
                { ns = "prod", b = 3 },
                { ns = "dev",  b = 4 },
            ]
            var = "item"
            id  = "ns"

            template { }
        }
        "#,
    )
    .await
    .unwrap();

    let Some(Node::Foreach(node)) = harness.controller.node(&NodeId::from("foreach.named"))
    else {
        panic!("expected foreach node");
    };
    assert_eq!(node.instance_id_list(), vec!["dev_1", "prod_1", "dev_2"]);

    harness.shutdown().await;
}

/// Permuting a keyed collection keeps every instance alive: the pulses do
/// not restart, so the downstream total stays put.
#[tokio::test]
async fn test_foreach_permutation_keeps_instances() {
    let harness = TestHarness::start(
        r#"
        testcomponents.summation "total" { }

        foreach "pulses" {
            collection = [
                { name = "a", max = 3 },
                { name = "b", max = 5 },
            ]
            var = "item"
            id  = "name"

            template {
                testcomponents.pulse "p" {
                    max        = item.max
                    frequency  = 10ms
                    forward_to = [testcomponents.summation.total.receiver]
                }
            }
        }
        "#,
    )
    .await
    .unwrap();

    harness
        .wait_until(WAIT, |h| {
            h.export_int("testcomponents.summation.total", "sum") == Some(8)
        })
        .await;

    harness
        .load(
            r#"
            testcomponents.summation "total" { }

            foreach "pulses" {
                collection = [
                    { name = "b", max = 5 },
                    { name = "a", max = 3 },
                ]
                var = "item"
                id  = "name"

                template {
                    testcomponents.pulse "p" {
                        max        = item.max
                        frequency  = 10ms
                        forward_to = [testcomponents.summation.total.receiver]
                    }
                }
            }
            "#,
        )
        .await
        .unwrap();

    // Recreated instances would pulse again and push the sum past 8.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.export_int("testcomponents.summation.total", "sum"),
        Some(8)
    );

    harness.shutdown().await;
}

/// An inline module contributes a declare that the outer config
/// instantiates; exports flow back out of the nested controller.
#[tokio::test]
async fn test_import_string_declare_instantiation() {
    let harness = TestHarness::start(
        r#"
        import.string "lib" {
            content = `
                declare "doubler" {
                    argument "value" { }
                    export "out" {
                        value = argument.value.value + argument.value.value
                    }
                }
            `
        }

        lib.doubler "d" { value = 21 }
        "#,
    )
    .await
    .unwrap();

    harness
        .wait_until(WAIT, |h| h.export_int("lib.doubler.d", "out") == Some(42))
        .await;

    let snapshot = harness.snapshot("lib.doubler.d").unwrap();
    assert_eq!(snapshot.kind, "custom");

    harness.shutdown().await;
}

/// Changing the supplied argument re-evaluates the nested controller in
/// place.
#[tokio::test]
async fn test_custom_component_argument_update() {
    let config = |value: i64| {
        format!(
            r#"
            declare "echo" {{
                argument "value" {{ }}
                export "out" {{ value = argument.value.value }}
            }}
            echo "e" {{ value = {} }}
            "#,
            value
        )
    };

    let harness = TestHarness::start(&config(1)).await.unwrap();
    harness
        .wait_until(WAIT, |h| h.export_int("echo.e", "out") == Some(1))
        .await;

    harness.load(&config(7)).await.unwrap();
    harness
        .wait_until(WAIT, |h| h.export_int("echo.e", "out") == Some(7))
        .await;

    harness.shutdown().await;
}

/// Graph shape of scenario "two listeners fan out into one writer": two
/// producers feeding one consumer through capsules.
#[tokio::test]
async fn test_fan_in_two_producers_one_consumer() {
    let harness = TestHarness::start(
        r#"
        testcomponents.summation "writer" { }

        testcomponents.pulse "listener_a" {
            max        = 1
            frequency  = 10ms
            forward_to = [testcomponents.summation.writer.receiver]
        }
        testcomponents.pulse "listener_b" {
            max        = 1
            frequency  = 10ms
            forward_to = [testcomponents.summation.writer.receiver]
        }
        "#,
    )
    .await
    .unwrap();

    harness
        .wait_until(WAIT, |h| {
            h.export_int("testcomponents.summation.writer", "sum") == Some(2)
        })
        .await;

    // Both producers depend on the consumer's capsule export.
    let edges = harness.controller.edges();
    let writer = NodeId::from("testcomponents.summation.writer");
    assert!(edges.contains(&(NodeId::from("testcomponents.pulse.listener_a"), writer.clone())));
    assert!(edges.contains(&(NodeId::from("testcomponents.pulse.listener_b"), writer)));

    harness.shutdown().await;
}

/// All-healthy graphs aggregate healthy; a failing node degrades the
/// aggregate to at least its level.
#[tokio::test]
async fn test_health_aggregation_monotonic() {
    let harness = TestHarness::start(
        "testcomponents.passthrough \"a\" { input = 1 }",
    )
    .await
    .unwrap();
    assert_eq!(
        harness.controller.aggregate_health().level,
        HealthLevel::Healthy
    );

    harness
        .load(
            r#"
            testcomponents.passthrough "a" { input = 1 }
            testcomponents.passthrough "bad" { input = nowhere.at.all }
            "#,
        )
        .await
        .unwrap();
    assert_eq!(
        harness.controller.aggregate_health().level,
        HealthLevel::Unhealthy
    );

    harness.shutdown().await;
}

/// Top-level attributes have no node kind and reject the load.
#[tokio::test]
async fn test_top_level_attribute_rejected() {
    let result = TestHarness::start("stray = 1").await;
    assert!(matches!(result, Err(LoadError::TopLevelAttribute { .. })));
}

/// A block whose type exists nowhere rejects the load wholesale.
#[tokio::test]
async fn test_unknown_component_type_rejected() {
    let result = TestHarness::start("no.such.thing \"x\" { }").await;
    assert!(matches!(result, Err(LoadError::UnknownComponent { .. })));
}
