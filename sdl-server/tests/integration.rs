//! Integration tests: exercise the full canvas lifecycle through the engine
//! facade.
//!
//! Create → LoadFile → UseSystem → AddGenerator → Start → EvaluateFlows →
//! AddMetric → drive traffic → QueryMetrics → ExecuteTrace → Delete
//!
//! The HTTP handlers are thin wrappers around `CanvasManager`/`Canvas`, so
//! driving the facade with wire-shaped data validates the full stack.

use std::sync::Arc;
use std::time::Duration;

use sdl_core::ast::{
    ComponentDecl, DepBinding, Expr, FileDecl, InstanceDecl, MethodDecl, ParamBinding, Stmt,
    SystemDecl, UnOp, UsesDecl,
};
use sdl_core::canvas::{AddGeneratorRequest, AddMetricRequest};
use sdl_core::metrics::{Aggregation, MetricType};
use sdl_core::parser::AstJsonParser;
use sdl_core::resolver::MemoryResolver;
use sdl_core::{CanvasManager, SdlError, Value};

/// server → cache → db demo topology, serialized the way the front-end
/// toolchain ships ASTs.
fn demo_source() -> String {
    let server = ComponentDecl {
        name: "Server".to_string(),
        params: Vec::new(),
        uses: vec![
            UsesDecl {
                name: "cache".to_string(),
                component_type: "Cache".to_string(),
            },
            UsesDecl {
                name: "db".to_string(),
                component_type: "Db".to_string(),
            },
        ],
        methods: vec![MethodDecl {
            name: "HandleRequest".to_string(),
            params: Vec::new(),
            returns: None,
            body: vec![
                Stmt::Let {
                    name: "hit".to_string(),
                    expr: Expr::call_dep("cache", "Read", vec![]),
                },
                Stmt::If {
                    cond: Expr::Unary {
                        op: UnOp::Not,
                        operand: Box::new(Expr::ident("hit")),
                    },
                    then_body: vec![Stmt::Expr {
                        expr: Expr::call_dep("db", "Query", vec![]),
                    }],
                    else_body: Vec::new(),
                },
                Stmt::Return {
                    expr: Some(Expr::ident("hit")),
                },
            ],
        }],
        native: None,
    };
    let db = ComponentDecl {
        name: "Db".to_string(),
        params: Vec::new(),
        uses: Vec::new(),
        methods: vec![MethodDecl {
            name: "Query".to_string(),
            params: Vec::new(),
            returns: None,
            body: vec![Stmt::Delay {
                expr: Expr::lit(Value::Duration(0.003)),
            }],
        }],
        native: None,
    };
    let file = FileDecl {
        path: String::new(),
        components: vec![server, db],
        systems: vec![SystemDecl {
            name: "Main".to_string(),
            instances: vec![
                InstanceDecl {
                    name: "server".to_string(),
                    component: "Server".to_string(),
                    params: Vec::new(),
                    bindings: vec![
                        DepBinding {
                            slot: "cache".to_string(),
                            target: "cache".to_string(),
                        },
                        DepBinding {
                            slot: "db".to_string(),
                            target: "db".to_string(),
                        },
                    ],
                },
                InstanceDecl {
                    name: "cache".to_string(),
                    component: "Cache".to_string(),
                    params: vec![ParamBinding {
                        name: "HitRate".to_string(),
                        expr: Expr::lit(Value::Float(0.8)),
                    }],
                    bindings: Vec::new(),
                },
                InstanceDecl {
                    name: "db".to_string(),
                    component: "Db".to_string(),
                    params: Vec::new(),
                    bindings: Vec::new(),
                },
            ],
        }],
    };
    serde_json::to_string(&file).expect("serialize demo file")
}

fn new_manager() -> CanvasManager {
    let resolver = MemoryResolver::new().with_file("demo.sdl", &demo_source());
    CanvasManager::new(Arc::new(resolver), Arc::new(AstJsonParser))
}

#[tokio::test]
async fn full_lifecycle() {
    let manager = new_manager();

    // 1. Create and activate.
    let info = manager.create("lifecycle").await;
    let canvas = manager.get(info.id).await.unwrap();
    let loaded = canvas.load_file("demo.sdl").await.unwrap();
    assert!(loaded.systems.contains(&"Main".to_string()));
    let info = canvas.use_system("Main").await.unwrap();
    assert_eq!(info.active_system.as_deref(), Some("Main"));

    // 2. Tune the cache and confirm the readback.
    let set = canvas.set_parameter("cache.HitRate", "0.8").await.unwrap();
    assert_eq!(set.new_value, Value::Float(0.8));

    // 3. Generator at 100 rps, flows match the hit rate split.
    let generator = canvas
        .add_generator(AddGeneratorRequest {
            name: "load".to_string(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate: 100.0,
            duration: 0.0,
            enabled: false,
        })
        .await
        .unwrap();
    assert!(canvas.start_generator(generator.id).await.unwrap());

    let flows = canvas.evaluate_flows("runtime", None).await.unwrap();
    assert_eq!(flows.status, "converged");
    assert!((flows.rates["cache.Read"] - 100.0).abs() < 1.0);
    assert!((flows.rates["db.Query"] - 20.0).abs() < 1.0);

    // 4. Metrics pick up generator-driven traffic.
    let metric = canvas
        .add_metric(AddMetricRequest {
            name: "reqs".to_string(),
            component: "server".to_string(),
            methods: vec!["HandleRequest".to_string()],
            metric_type: MetricType::Count,
            aggregation: Aggregation::Sum,
            window_secs: 1.0,
            match_result: None,
            match_result_type: None,
            enabled: true,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    canvas.stop_all().await;

    let now = sdl_core::canvas::now_secs();
    let points = canvas
        .metrics()
        .query(metric.id, now - 120.0, now + 120.0, None)
        .await
        .unwrap();
    let total: f64 = points.iter().map(|p| p.value).sum();
    assert!(total > 0.0, "expected traffic to be recorded");

    // 5. Deterministic debug trace.
    let a = canvas
        .execute_trace("server", "HandleRequest", Some(7))
        .await
        .unwrap();
    let b = canvas
        .execute_trace("server", "HandleRequest", Some(7))
        .await
        .unwrap();
    assert_eq!(a.events, b.events);
    assert!(!a.events.is_empty());

    // 6. Diagram reflects the last flow snapshot.
    let diagram = canvas.system_diagram().await.unwrap();
    assert!(diagram.nodes.iter().any(|n| n.component == "server"));

    // 7. Teardown terminates streams.
    let (subscriber, _notify) = canvas.metrics().clone().subscribe(vec![metric.id]).await;
    let hub = canvas.metrics().clone();
    manager.delete(canvas.id).await.unwrap();
    assert!(hub.subscriber_closed(subscriber).await);
    assert!(matches!(
        manager.get(info.id).await,
        Err(SdlError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_system_and_missing_file() {
    let manager = new_manager();
    let info = manager.create("errors").await;
    let canvas = manager.get(info.id).await.unwrap();

    assert!(matches!(
        canvas.load_file("nope.sdl").await,
        Err(SdlError::NotFound(_))
    ));

    canvas.load_file("demo.sdl").await.unwrap();
    assert!(matches!(
        canvas.use_system("Ghost").await,
        Err(SdlError::NotFound(_))
    ));
}

#[tokio::test]
async fn parse_errors_propagate_through_load() {
    let resolver = MemoryResolver::new().with_file("broken.sdl", "{ this is not an ast");
    let manager = CanvasManager::new(Arc::new(resolver), Arc::new(AstJsonParser));
    let info = manager.create("parse").await;
    let canvas = manager.get(info.id).await.unwrap();

    assert!(matches!(
        canvas.load_file("broken.sdl").await,
        Err(SdlError::Parse { .. })
    ));
}

#[tokio::test]
async fn generator_update_with_field_mask() {
    let manager = new_manager();
    let info = manager.create("update").await;
    let canvas = manager.get(info.id).await.unwrap();
    canvas.load_file("demo.sdl").await.unwrap();
    canvas.use_system("Main").await.unwrap();

    let spec = canvas
        .add_generator(AddGeneratorRequest {
            name: "load".to_string(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate: 10.0,
            duration: 0.0,
            enabled: false,
        })
        .await
        .unwrap();

    let patch = sdl_core::generator::GeneratorPatch {
        rate: Some(25.0),
        ..Default::default()
    };
    let updated = canvas
        .update_generator(spec.id, patch, vec!["rate".to_string()])
        .await
        .unwrap();
    assert_eq!(updated.rate, 25.0);
    assert_eq!(updated.method, "HandleRequest");

    canvas.delete_generator(spec.id).await.unwrap();
    assert!(matches!(
        canvas.get_generator(spec.id).await,
        Err(SdlError::NotFound(_))
    ));
}
