use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use prompt_sweep::backends::callback::CallbackBackend;
use prompt_sweep::backends::traits::BackendReply;
use prompt_sweep::config::SweepConfig;
use prompt_sweep::telemetry::RunReport;
use prompt_sweep::templates::{PermutationGenerator, Variables};
use serde_json::{Value, json};

const TEMPLATE: &str = "Give a ${style} answer ($0 budget): is ${capital} the capital of ${country}?";

fn variables() -> Variables {
    Variables::from_json(&json!({
        "country": [
            { "text": "France", "associate_id": 1, "metavars": { "continent": "Europe" } },
            { "text": "Japan", "associate_id": 2, "metavars": { "continent": "Asia" } }
        ],
        "capital": [
            { "text": "Paris", "associate_id": 1 },
            { "text": "Tokyo", "associate_id": 2 }
        ],
        "style": ["short", "long"]
    }))
    .unwrap()
}

fn sweep_config(path: &Path, n: u32) -> SweepConfig {
    SweepConfig::from_json_str(
        &json!({
            "cache_path": path,
            "model": "socket",
            "n": n,
            "rate_limits": { "socket": { "batch_size": 2, "cooldown_secs": 0.01 } }
        })
        .to_string(),
    )
    .unwrap()
}

/// Callback-style client answering from a spawned task.
fn socket_backend(calls: Arc<AtomicUsize>) -> CallbackBackend {
    CallbackBackend::new("socket", move |request, completion| {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let answers: Vec<String> = (0..request.n().get())
                .map(|i| format!("yes ({i})"))
                .collect();
            completion.complete(Ok(BackendReply::new(request.to_payload(), json!(answers))));
        });
    })
}

#[test]
fn generation_keeps_correlated_values_together() {
    let generator = PermutationGenerator::new(TEMPLATE).unwrap();
    let vars = variables();
    let prompts = generator.generate(&vars);

    assert_eq!(prompts.len(), 4);
    assert_eq!(generator.count(&vars), 4);
    for prompt in &prompts {
        let body = prompt.body();
        assert!(prompt.is_concrete());
        assert!(body.contains("($0 budget)"));
        assert_eq!(body.contains("France"), body.contains("Paris"), "{body}");
        assert_eq!(body.contains("Japan"), body.contains("Tokyo"), "{body}");
        let continent = &prompt.metavars()["continent"];
        assert_eq!(continent, if body.contains("France") { "Europe" } else { "Asia" });
    }
}

#[tokio::test]
async fn sweep_runs_caches_and_tops_up() {
    let mut path = std::env::temp_dir();
    path.push(format!("prompt-sweep-{}", uuid::Uuid::new_v4()));
    path.push("cache.json");

    let calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(socket_backend(Arc::clone(&calls)));
    let vars = variables();

    // First run: everything goes to the backend.
    let config = sweep_config(&path, 2);
    let pipeline = config.pipeline(backend.clone());
    let outcomes = pipeline
        .run(TEMPLATE, &vars, &config.query_settings())
        .await
        .unwrap();
    let (records, report) = RunReport::drain(outcomes).await;

    assert!(report.is_clean());
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.responses, 8);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    for record in &records {
        assert_eq!(record.responses(), ["yes (0)", "yes (1)"]);
        assert_eq!(record.backend_id(), "socket");
        assert!(record.metavars().contains_key("continent"));
    }

    let document: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let entries = document.as_object().unwrap();
    assert_eq!(entries.len(), 4);
    for (prompt, entry) in entries {
        assert_eq!(entry["llm"], "socket");
        assert_eq!(entry["responses"].as_array().unwrap().len(), 2);
        assert_eq!(entry["query"]["prompt"], prompt.as_str());
        assert!(entry["info"]["style"].is_string());
    }

    // Same settings again: nothing left to ask for.
    let estimate = pipeline
        .estimate(TEMPLATE, &vars, &config.query_settings())
        .await
        .unwrap();
    assert_eq!((estimate.prompts, estimate.cached, estimate.calls), (4, 4, 0));

    // Raising n only asks for the difference.
    let config = sweep_config(&path, 3);
    let pipeline = config.pipeline(backend);
    let estimate = pipeline
        .estimate(TEMPLATE, &vars, &config.query_settings())
        .await
        .unwrap();
    assert_eq!((estimate.calls, estimate.samples), (4, 4));

    let outcomes = pipeline
        .run(TEMPLATE, &vars, &config.query_settings())
        .await
        .unwrap();
    let (records, report) = RunReport::drain(outcomes).await;
    assert_eq!(report.succeeded, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    for record in &records {
        assert_eq!(record.responses(), ["yes (0)", "yes (1)", "yes (0)"]);
    }

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn malformed_variables_stop_before_any_call() {
    let err = Variables::from_json(&json!({ "style": 3 })).unwrap_err();
    assert!(err.to_string().contains("style"));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut path = std::env::temp_dir();
    path.push(format!("prompt-sweep-{}", uuid::Uuid::new_v4()));
    path.push("cache.json");

    let config = sweep_config(&path, 1);
    let result = config
        .pipeline(Arc::new(socket_backend(Arc::clone(&calls))))
        .run("Broken ${template", &variables(), &config.query_settings())
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!path.exists());
}
