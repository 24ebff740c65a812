//! Filer-runtime tests: broker contract and wildcard uploads, using
//! `file://` URLs so the whole transfer path runs against tempdirs.

use std::sync::Arc;

use poiesis_core::broker::MessageBroker;
use poiesis_core::config::Config;
use poiesis_core::filer::run_filer;
use poiesis_core::filer::tif::Tif;
use poiesis_core::filer::tof::Tof;
use poiesis_models::tes::{TesInput, TesOutput, TesTask};
use poiesis_test_utils::InMemoryBroker;
use uuid::Uuid;

fn task_with(inputs: Vec<TesInput>, outputs: Vec<TesOutput>) -> TesTask {
    TesTask {
        id: Some(Uuid::new_v4().to_string()),
        inputs: (!inputs.is_empty()).then_some(inputs),
        outputs: (!outputs.is_empty()).then_some(outputs),
        ..TesTask::default()
    }
}

#[tokio::test]
async fn tif_publishes_success_after_staging() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.txt");
    std::fs::write(&source, "bytes").unwrap();

    let task = task_with(
        vec![TesInput {
            path: "/data/in.txt".to_owned(),
            url: Some(format!("file://{}", source.display())),
            ..TesInput::default()
        }],
        vec![],
    );
    let task_id = task.id.clone().unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let mut sub = broker.subscribe(&task_id).await.unwrap();

    let tif = Tif::new(&task, &Config::from_env())
        .unwrap()
        .with_staging_root(dir.path().join("transfer"));
    run_filer(&tif, broker.as_ref()).await.unwrap();

    let message = sub.next_message().await.unwrap();
    assert!(!message.is_error());
    assert_eq!(message.message, "Filer completed");
}

#[tokio::test]
async fn tif_publishes_error_and_fails_on_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let task = task_with(
        vec![TesInput {
            path: "/data/in.txt".to_owned(),
            url: Some("file:///nonexistent/in.txt".to_owned()),
            ..TesInput::default()
        }],
        vec![],
    );
    let task_id = task.id.clone().unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let mut sub = broker.subscribe(&task_id).await.unwrap();

    let tif = Tif::new(&task, &Config::from_env())
        .unwrap()
        .with_staging_root(dir.path().join("transfer"));
    assert!(run_filer(&tif, broker.as_ref()).await.is_err());

    let message = sub.next_message().await.unwrap();
    assert!(message.is_error());
    assert!(message.message.starts_with("TIF failed:"), "{}", message.message);
}

#[tokio::test]
async fn tof_uploads_glob_matches_with_relative_keys() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("transfer");
    std::fs::create_dir_all(staging.join("work/res")).unwrap();
    for name in ["SRR1.fna", "SRR2.fna", "SRR3.fna", "notes.txt"] {
        std::fs::write(staging.join("work/res").join(name), name).unwrap();
    }

    let sink = dir.path().join("sink");
    let task = task_with(
        vec![],
        vec![TesOutput {
            path: "/work/res/SRR*.fna".to_owned(),
            path_prefix: Some("/work/res/".to_owned()),
            url: format!("file://{}", sink.display()),
            ..TesOutput::default()
        }],
    );
    let task_id = task.id.clone().unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let mut sub = broker.subscribe(&task_id).await.unwrap();

    let tof = Tof::new(&task, &Config::from_env())
        .unwrap()
        .with_staging_root(&staging);
    run_filer(&tof, broker.as_ref()).await.unwrap();

    assert!(!sub.next_message().await.unwrap().is_error());

    // Exactly the three matches arrived, each under its relative key.
    for name in ["SRR1.fna", "SRR2.fna", "SRR3.fna"] {
        assert_eq!(std::fs::read_to_string(sink.join(name)).unwrap(), name);
    }
    assert!(!sink.join("notes.txt").exists());
}

#[tokio::test]
async fn tof_glob_without_matches_falls_back_to_base_directory() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("transfer");
    std::fs::create_dir_all(staging.join("work/res")).unwrap();
    std::fs::write(staging.join("work/res/other.txt"), "leftover").unwrap();

    let sink = dir.path().join("sink");
    let task = task_with(
        vec![],
        vec![TesOutput {
            path: "/work/res/SRR*.fna".to_owned(),
            url: format!("file://{}", sink.display()),
            ..TesOutput::default()
        }],
    );
    let task_id = task.id.clone().unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let tof = Tof::new(&task, &Config::from_env())
        .unwrap()
        .with_staging_root(&staging);
    run_filer(&tof, broker.as_ref()).await.unwrap();

    // The base directory's contents were uploaded instead.
    assert_eq!(
        std::fs::read_to_string(sink.join("other.txt")).unwrap(),
        "leftover"
    );
}
