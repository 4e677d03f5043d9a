mod common;

use anyhow::Result;
use common::TestApp;
use jobjam::jobs::{JobQueue, JobState};
use jobjam::models::ApplicationStatus;
use jobjam::ApplyError;
use uuid::Uuid;

#[tokio::test]
async fn enqueue_creates_a_queued_record_linked_to_its_job() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", Some("101")).await;

    let receipt = app
        .gateway()
        .enqueue_generated(user_id, vacancy_id, None)
        .await?;
    assert_eq!(receipt.status, ApplicationStatus::Queued);
    assert_eq!(receipt.queue_position, Some(1));

    let view = app
        .gateway()
        .get_application(receipt.application_id, user_id)
        .await?;
    assert_eq!(view.application.status, ApplicationStatus::Queued);
    assert_eq!(view.application.job_id, Some(receipt.job_id));
    assert_eq!(
        view.vacancy.as_ref().map(|v| v.title.as_str()),
        Some("Backend Developer")
    );

    let queue_info = view.queue_info.expect("queued application has queue info");
    assert_eq!(queue_info.job_id, receipt.job_id);
    assert_eq!(queue_info.state, JobState::Waiting);
    assert_eq!(queue_info.position, Some(1));
    assert_eq!(queue_info.progress, 0);
    Ok(())
}

#[tokio::test]
async fn second_application_to_the_same_posting_conflicts() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", None).await;

    app.gateway()
        .enqueue_generated(user_id, vacancy_id, None)
        .await?;
    let err = app
        .gateway()
        .enqueue_generated(user_id, vacancy_id, Some("Hello".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Conflict(_)), "got {err:?}");

    let resume = app.insert_resume(user_id, None).await?;
    let err = app
        .gateway()
        .enqueue_with_existing_resume(user_id, vacancy_id, &resume.id.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Conflict(_)), "got {err:?}");

    assert_eq!(app.job_count().await?, 1);
    assert_eq!(app.gateway().list_applications(user_id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_or_inactive_postings_are_rejected_before_queueing() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;
    let closed = app
        .insert_vacancy_with_status("Archived Role", None, "CLOSED")
        .await;

    let err = app
        .gateway()
        .enqueue_generated(user_id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::NotFound(_)), "got {err:?}");

    let err = app
        .gateway()
        .enqueue_generated(user_id, closed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Conflict(_)), "got {err:?}");

    assert_eq!(app.job_count().await?, 0);
    assert!(app.gateway().list_applications(user_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn reusing_an_unknown_resume_is_not_found() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", false).await;
    let other_user = app.insert_user("Daniyar", false).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", None).await;
    let foreign_resume = app.insert_resume(other_user, Some("hh-foreign")).await?;

    for resume_ref in [foreign_resume.id.to_string(), "hh-foreign".to_string()] {
        let err = app
            .gateway()
            .enqueue_with_existing_resume(user_id, vacancy_id, &resume_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::NotFound(_)), "got {err:?}");
    }
    assert_eq!(app.job_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn reuse_records_the_resolved_resume_at_enqueue_time() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", false).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", None).await;
    let resume = app.insert_resume(user_id, Some("hh-777")).await?;

    let receipt = app
        .gateway()
        .enqueue_with_existing_resume(user_id, vacancy_id, "hh-777")
        .await?;
    let view = app
        .gateway()
        .get_application(receipt.application_id, user_id)
        .await?;
    assert_eq!(view.application.resume_id, Some(resume.id));
    Ok(())
}

#[tokio::test]
async fn applications_are_private_to_their_owner() -> Result<()> {
    let app = TestApp::new()?;
    let owner = app.insert_user("Aigerim", true).await;
    let stranger = app.insert_user("Daniyar", true).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", None).await;

    let receipt = app
        .gateway()
        .enqueue_generated(owner, vacancy_id, None)
        .await?;

    let err = app
        .gateway()
        .get_application(receipt.application_id, stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Forbidden(_)), "got {err:?}");

    let err = app
        .gateway()
        .cancel(receipt.application_id, stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Forbidden(_)), "got {err:?}");

    assert!(app.gateway().list_applications(stranger).await?.is_empty());
    assert_eq!(app.gateway().list_applications(owner).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_removes_job_and_record_once() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;
    let vacancy_id = app.insert_vacancy("Backend Developer", None).await;

    let receipt = app
        .gateway()
        .enqueue_generated(user_id, vacancy_id, None)
        .await?;

    let cancellation = app.gateway().cancel(receipt.application_id, user_id).await?;
    assert!(cancellation.job_removed);
    assert!(app.queue.snapshot(receipt.job_id).await.is_none());
    assert!(app.gateway().list_applications(user_id).await?.is_empty());

    let err = app
        .gateway()
        .cancel(receipt.application_id, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::NotFound(_)), "got {err:?}");

    // The posting can be applied to again once the earlier attempt is gone.
    app.gateway()
        .enqueue_generated(user_id, vacancy_id, None)
        .await?;
    Ok(())
}

#[tokio::test]
async fn waiting_positions_follow_enqueue_order() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;

    let mut receipts = Vec::new();
    for title in ["Backend Developer", "Data Engineer", "SRE"] {
        let vacancy_id = app.insert_vacancy(title, None).await;
        receipts.push(
            app.gateway()
                .enqueue_generated(user_id, vacancy_id, None)
                .await?,
        );
    }

    let positions: Vec<_> = receipts.iter().map(|r| r.queue_position).collect();
    assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);

    // Reserving the head moves everyone else up.
    let reserved = app.queue.reserve().await?.expect("a job is due");
    assert_eq!(reserved.id, receipts[0].job_id);
    assert_eq!(app.queue.waiting_position(receipts[0].job_id).await?, None);
    assert_eq!(app.queue.waiting_position(receipts[1].job_id).await?, Some(1));
    assert_eq!(app.queue.waiting_position(receipts[2].job_id).await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn queue_stats_total_is_the_sum_of_states() -> Result<()> {
    let app = TestApp::new()?;
    let user_id = app.insert_user("Aigerim", true).await;
    for title in ["Backend Developer", "Data Engineer", "SRE"] {
        let vacancy_id = app.insert_vacancy(title, None).await;
        app.gateway()
            .enqueue_generated(user_id, vacancy_id, None)
            .await?;
    }
    app.queue.reserve().await?;

    let stats = app.gateway().queue_stats().await?;
    assert_eq!(stats.waiting, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(
        stats.total,
        stats.waiting + stats.active + stats.completed + stats.failed + stats.delayed
    );
    Ok(())
}
