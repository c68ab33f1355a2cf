// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::test_helpers::{
    MemoryEngine, RestoringParity, drain, par2_index, processor, test_config,
};
use crate::engine::{QueueAspect, QueueObserver};
use crate::parity::ParityHandler;
use crate::post_queue::PostJob;
use crate::types::{Event, ParStatus, Stage};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;


const CONTENT: &[u8] = &[7u8; 2500];

/// Write `show.par2` describing `show.mkv` plus the source file itself
fn write_set(dir: &Path, damaged: bool) {
    std::fs::write(
        dir.join("show.par2"),
        par2_index(1024, &[("show.mkv", CONTENT)]),
    )
    .unwrap();
    let mut content = CONTENT.to_vec();
    if damaged {
        content[100] ^= 0xff;
        content[2100] ^= 0xff;
    }
    std::fs::write(dir.join("show.mkv"), content).unwrap();
}

fn restoring(dir: &Path, blocks_needed: u32) -> Arc<RestoringParity> {
    Arc::new(RestoringParity::new(
        blocks_needed,
        vec![(dir.join("show.mkv"), CONTENT.to_vec())],
    ))
}

fn events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn only_job(mut jobs: Vec<PostJob>) -> PostJob {
    assert_eq!(jobs.len(), 1, "expected exactly one completed job");
    jobs.remove(0)
}

fn assert_monotonic(job: &PostJob) {
    let stages = job.stages();
    assert_eq!(stages.first(), Some(&Stage::Queued));
    assert_eq!(stages.last(), Some(&Stage::Finished));
    for pair in stages.windows(2) {
        assert!(
            pair[0].can_advance_to(pair[1]),
            "illegal transition {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn damaged_collection_is_repaired_with_requested_volumes() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), true);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection(
        "show.nzb",
        dir.path(),
        &[
            ("show.vol00+01.par2", true),
            ("show.vol01+02.par2", true),
            ("show.vol03+04.par2", true),
        ],
    );
    let big = engine.file_id("show.vol03+04.par2").unwrap();
    let parity = restoring(dir.path(), 3);
    let processor = processor(
        test_config(),
        engine.clone(),
        Some(parity.clone() as Arc<dyn ParityHandler>),
    );
    let mut rx = processor.subscribe();

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_eq!(
        job.stages(),
        &[
            Stage::Queued,
            Stage::LoadingPars,
            Stage::VerifyingSources,
            Stage::Repairing,
            Stage::VerifyingRepaired,
            Stage::ExecutingScript,
            Stage::Finished,
        ]
    );
    assert!(!job.par_failed());
    assert_eq!(job.par_status(), ParStatus::Success);
    assert_eq!(job.par_filename(), Some("show.par2"));
    assert!(!job.is_working());
    assert_eq!(std::fs::read(dir.path().join("show.mkv")).unwrap(), CONTENT);

    // only the smallest volume covering the deficit was fetched
    assert_eq!(engine.unpaused(), vec![big]);
    assert_eq!(parity.repairs.load(Ordering::SeqCst), 1);
    // the two unused volumes are dropped from the download queue
    assert_eq!(engine.removed().len(), 2);

    let events = events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::BlocksRequested { needed: 3, found: 4, .. }
    )));
    assert!(matches!(
        events.last(),
        Some(Event::JobFinished {
            par_status: ParStatus::Success,
            par_failed: false,
            ..
        })
    ));
}

#[tokio::test]
async fn unrepairable_collection_still_finishes() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), true);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+01.par2", true)]);
    let parity = restoring(dir.path(), 3);
    let processor = processor(
        test_config(),
        engine.clone(),
        Some(parity.clone() as Arc<dyn ParityHandler>),
    );
    let mut rx = processor.subscribe();

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_monotonic(&job);
    assert!(job.stages().contains(&Stage::Repairing));
    assert!(job.par_failed());
    assert_eq!(job.par_status(), ParStatus::Failure);

    // nothing is fetched when the reserve cannot close the gap
    assert!(engine.unpaused().is_empty());
    assert!(engine.removed().is_empty());
    assert_eq!(parity.repairs.load(Ordering::SeqCst), 0);
    assert_ne!(std::fs::read(dir.path().join("show.mkv")).unwrap(), CONTENT);

    let events = events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::BlocksRequested { needed: 3, found: 1, .. }
    )));
    assert!(events.iter().any(|e| matches!(e, Event::ParFailed { .. })));
}

#[tokio::test]
async fn intact_collection_skips_repair() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), false);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+01.par2", true)]);
    let processor = processor(test_config(), engine.clone(), None);

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_eq!(
        job.stages(),
        &[
            Stage::Queued,
            Stage::LoadingPars,
            Stage::VerifyingSources,
            Stage::ExecutingScript,
            Stage::Finished,
        ]
    );
    assert_eq!(job.par_status(), ParStatus::Success);
    assert!(!job.par_failed());
    assert_eq!(engine.removed().len(), 1);
}

#[tokio::test]
async fn disabled_par_check_goes_straight_to_the_script() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), true);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+01.par2", true)]);
    let mut config = test_config();
    config.par.par_check = false;
    let processor = processor(config, engine.clone(), None);

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_eq!(
        job.stages(),
        &[Stage::Queued, Stage::ExecutingScript, Stage::Finished]
    );
    assert!(!job.par_check());
    assert_eq!(job.par_status(), ParStatus::None);
    assert!(!job.par_failed());
}

#[tokio::test]
async fn collection_without_pars_is_not_checked() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("show.mkv"), CONTENT).unwrap();
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[]);
    let processor = processor(test_config(), engine.clone(), None);

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_eq!(job.par_filename(), None);
    assert!(!job.par_check());
    assert_eq!(
        job.stages(),
        &[Stage::Queued, Stage::ExecutingScript, Stage::Finished]
    );
}

#[tokio::test]
async fn repair_disabled_reports_repair_possible() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), true);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+04.par2", true)]);
    let mut config = test_config();
    config.par.par_repair = false;
    let processor = processor(
        config,
        engine.clone(),
        Some(restoring(dir.path(), 3) as Arc<dyn ParityHandler>),
    );

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_monotonic(&job);
    assert!(!job.stages().contains(&Stage::Repairing));
    assert!(job.par_failed());
    assert_eq!(job.par_status(), ParStatus::RepairPossible);
    assert!(engine.unpaused().is_empty());
}

#[tokio::test]
async fn unreadable_par_file_fails_the_check() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("show.par2"), b"not a par2 file").unwrap();
    std::fs::write(dir.path().join("show.mkv"), CONTENT).unwrap();
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[]);
    let processor = processor(test_config(), engine.clone(), None);

    drain(&processor, &engine).await;

    let job = only_job(processor.take_completed().await);
    assert_eq!(
        job.stages(),
        &[
            Stage::Queued,
            Stage::LoadingPars,
            Stage::ExecutingScript,
            Stage::Finished,
        ]
    );
    assert!(job.par_failed());
    assert_eq!(job.par_status(), ParStatus::Failure);
}

#[tokio::test]
async fn jobs_run_in_arrival_order_one_at_a_time() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default());
    for name in ["a", "b", "c"] {
        let dir = root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        write_set(&dir, false);
        engine.add_collection(&format!("{name}.nzb"), &dir, &[]);
    }
    let processor = processor(test_config(), engine.clone(), None);

    for _ in 0..100 {
        processor.tick().await;
        let guard = processor.lock_post_queue().await;
        // only the head is ever past Queued
        assert!(guard.iter().skip(1).all(|job| job.stage() == Stage::Queued));
        // pending and completed never share a collection
        for job in guard.completed() {
            assert!(guard.find(job.nzb_name()).is_none());
        }
        if guard.is_empty() {
            break;
        }
    }

    let order: Vec<String> = processor
        .take_completed()
        .await
        .iter()
        .map(|job| job.nzb_name().to_string())
        .collect();
    assert_eq!(order, ["a.nzb", "b.nzb", "c.nzb"]);
}

#[tokio::test]
async fn repeated_notifications_queue_a_collection_once() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), false);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+01.par2", true)]);
    let mut config = test_config();
    config.par.par_check = false;
    let processor = processor(config, engine.clone(), None);
    let mut rx = processor.subscribe();

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor.queue_changed(&snapshot, None).await;
    processor.tick().await;
    processor.queue_changed(&snapshot, None).await;
    processor.tick().await;

    let queued = events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::JobQueued { .. }))
        .count();
    assert_eq!(queued, 1);
    assert_eq!(processor.take_completed().await.len(), 1);
}

#[tokio::test]
async fn observer_leaves_detection_to_the_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), false);
    // a main PAR2 file still paused would make detection unpause it
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("extra.par2", true)]);
    let processor = processor(test_config(), engine.clone(), None);
    let mut rx = processor.subscribe();

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor.queue_changed(&snapshot, None).await;

    assert!(processor.lock_post_queue().await.is_empty());
    assert!(engine.unpaused().is_empty(), "no engine calls from the observer");
    assert!(events(&mut rx).is_empty());

    processor.tick().await;
    assert!(!engine.unpaused().is_empty());
}

#[tokio::test]
async fn observer_finishes_script_less_jobs_inline() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[]);
    let processor = processor(test_config(), engine.clone(), None);
    processor
        .lock_post_queue()
        .await
        .push_back(PostJob::new("show.nzb", dir.path(), None, "show", false));

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor.queue_changed(&snapshot, None).await;

    // Queued -> ExecutingScript -> Finished needs no disk work
    assert!(!processor.has_more_jobs());
    let job = only_job(processor.take_completed().await);
    assert_eq!(job.stage(), Stage::Finished);
}

#[tokio::test]
async fn observer_leaves_par_work_to_the_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), false);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[]);
    let processor = processor(test_config(), engine.clone(), None);
    processor.lock_post_queue().await.push_back(PostJob::new(
        "show.nzb",
        dir.path(),
        Some("show.par2".into()),
        "show",
        true,
    ));

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor.queue_changed(&snapshot, None).await;

    let guard = processor.lock_post_queue().await;
    assert_eq!(guard.head().map(PostJob::stage), Some(Stage::LoadingPars));
}

#[tokio::test]
async fn collection_added_pauses_par_volumes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection(
        "show.nzb",
        dir.path(),
        &[
            ("show.mkv", false),
            ("show.par2", false),
            ("show.vol00+01.par2", false),
        ],
    );
    let processor = processor(test_config(), engine.clone(), None);

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor
        .queue_changed(
            &snapshot,
            Some(&QueueAspect::CollectionAdded {
                nzb_name: "show.nzb".into(),
            }),
        )
        .await;

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    let paused: Vec<&str> = snapshot
        .files_of("show.nzb")
        .filter(|f| f.paused)
        .map(|f| f.filename.as_str())
        .collect();
    assert_eq!(paused, ["show.vol00+01.par2"]);
    // still downloading, so nothing is queued
    assert!(!processor.has_more_jobs());
}

#[tokio::test]
async fn notifications_after_shutdown_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[]);
    let processor = processor(test_config(), engine.clone(), None);

    processor.shutdown().await;
    assert!(processor.is_shutting_down());

    let snapshot = crate::engine::DownloadEngine::snapshot(engine.as_ref()).await;
    processor.queue_changed(&snapshot, None).await;
    assert!(processor.lock_post_queue().await.is_empty());
}

#[tokio::test]
async fn scheduler_task_processes_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    write_set(dir.path(), true);
    let engine = Arc::new(MemoryEngine::default());
    engine.add_collection("show.nzb", dir.path(), &[("show.vol00+04.par2", true)]);
    let processor = processor(
        test_config(),
        engine.clone(),
        Some(restoring(dir.path(), 2) as Arc<dyn ParityHandler>),
    );
    let mut rx = processor.subscribe();

    let handle = processor.start();
    let finished = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            engine.download_unpaused(b"volume");
            match tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await {
                Ok(Ok(Event::JobFinished { par_status, .. })) => return par_status,
                Ok(Ok(_)) | Err(_) => {}
                Ok(Err(e)) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("job did not finish");
    assert_eq!(finished, ParStatus::Success);

    processor.shutdown().await;
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn completed_jobs_are_bounded() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default());
    for i in 0..4 {
        engine.add_collection(&format!("c{i}.nzb"), root.path().join(format!("c{i}")), &[]);
    }
    let mut config = test_config();
    config.queue.max_completed_jobs = 2;
    let processor = processor(config, engine.clone(), None);

    drain(&processor, &engine).await;

    let names: Vec<String> = processor
        .take_completed()
        .await
        .iter()
        .map(|job| job.nzb_name().to_string())
        .collect();
    assert_eq!(names, ["c2.nzb", "c3.nzb"]);
}
