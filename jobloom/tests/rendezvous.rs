//! Form rendezvous: pull mode and callback mode.

mod common;

use std::sync::Arc;

use common::*;
use jobloom::document::{FormMap, Job, Script, Step, TemplateFile, Workflow};
use jobloom::engine::{FormHandler, WorkflowEngine};
use jobloom::events::{FormRequest, ResultEvent};
use jobloom::executors::ExecutorError;
use jobloom::graph::PathValue;
use jobloom::repository::LocalRepository;
use serde_json::json;

fn form(pairs: &[(&str, &str)]) -> FormMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

#[tokio::test]
async fn job_level_form_suspends_until_data_is_provided() {
    let workflow = Workflow::default().with_job(
        Job::new("greeter")
            .with_form(json!({"required": ["name"]}))
            .with_step(shell_step("hello", "echo Hello World")),
    );

    let engine = Arc::new(WorkflowEngine::new(workflow));
    let mut stream = engine.execute().unwrap();

    let mut requests: Vec<FormRequest> = Vec::new();
    let mut chunks: Vec<String> = Vec::new();
    while let Some(item) = stream.next().await {
        let (_, event) = item.expect("no failure expected");
        match event {
            ResultEvent::Form(request) => {
                assert!(
                    request.unique_id.starts_with("job_greeter_"),
                    "unexpected rendezvous id {}",
                    request.unique_id
                );
                assert_eq!(request.schema, json!({"required": ["name"]}));
                engine.provide_form_data(&request.unique_id, form(&[("name", "X")]));
                requests.push(request);
            }
            ResultEvent::Shell(chunk) => chunks.push(chunk.chunk),
            _ => {}
        }
    }

    assert_eq!(requests.len(), 1, "exactly one form request");
    assert!(chunks.contains(&"Hello World".to_string()), "got {chunks:?}");

    // The accepted map is stored on the job and visible through lookup.
    match engine.lookup("jobs.greeter.formData").unwrap() {
        PathValue::FormData(map) => assert_eq!(map, form(&[("name", "X")])),
        other => panic!("expected form data, got {other:?}"),
    }
}

#[tokio::test]
async fn data_provided_before_the_wait_is_buffered() {
    let engine = WorkflowEngine::new(Workflow::default());
    assert!(engine.provide_form_data("early-id", form(&[("k", "v")])));
    assert_eq!(
        engine.wait_for_form_data("early-id").await,
        Some(form(&[("k", "v")]))
    );
    // The id is spent: a second delivery is ignored.
    assert!(!engine.provide_form_data("early-id", form(&[("k", "other")])));
}

struct StaticHandler(FormMap);

#[async_trait::async_trait]
impl FormHandler for StaticHandler {
    async fn on_form_request(&self, _request: &FormRequest) -> Result<FormMap, ExecutorError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn step_level_form_feeds_the_template_renderer() {
    let repo_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(repo_dir.path().join("greeting.j2"), "Hello {{ name }}!")
        .await
        .unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let step = Step::new(Script::Template {
        id: "render-script".into(),
        files: vec![TemplateFile {
            file: "greeting.j2".into(),
            output: "greeting.txt".into(),
        }],
    })
    .with_id("render")
    .with_form(json!({"required": ["name"]}));

    let workflow = Workflow::default().with_job(Job::new("templated").with_step(step));
    let engine = WorkflowEngine::builder(workflow)
        .working_dir(work_dir.path())
        .repository(Arc::new(LocalRepository::new(repo_dir.path())), None::<String>)
        .form_handler(Arc::new(StaticHandler(form(&[("name", "Ada")]))))
        .build();

    let (pairs, error) = drain(engine.execute().unwrap()).await;
    assert!(error.is_none(), "unexpected failure: {error:?}");

    // The form request still surfaced, with the step-scoped id prefix.
    let request = pairs
        .iter()
        .find_map(|(_, event)| match event {
            ResultEvent::Form(request) => Some(request.clone()),
            _ => None,
        })
        .expect("form request emitted");
    assert!(request.unique_id.starts_with("step_render_"));
    assert_eq!(request.script_id, "render-script");

    let written = tokio::fs::read_to_string(work_dir.path().join("greeting.txt"))
        .await
        .unwrap();
    assert_eq!(written, "Hello Ada!");

    match engine.lookup("jobs.templated.steps.render.formData").unwrap() {
        PathValue::FormData(map) => assert_eq!(map, form(&[("name", "Ada")])),
        other => panic!("expected form data, got {other:?}"),
    }
}

#[tokio::test]
async fn rendezvous_ids_stay_unique_across_requests() {
    let workflow = Workflow::default()
        .with_job(
            Job::new("a")
                .with_form(json!({}))
                .with_step(shell_step("a1", "echo a")),
        )
        .with_job(
            Job::new("b")
                .with_form(json!({}))
                .with_step(shell_step("b1", "echo b")),
        );

    let engine = Arc::new(WorkflowEngine::new(workflow));
    let mut stream = engine.execute().unwrap();

    let mut ids = Vec::new();
    while let Some(item) = stream.next().await {
        let (_, event) = item.unwrap();
        if let ResultEvent::Form(request) = event {
            ids.push(request.unique_id.clone());
            engine.provide_form_data(&request.unique_id, FormMap::default());
        }
    }
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}
