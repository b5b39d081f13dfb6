use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::join_all;

use super::*;
use crate::credits::{ChargeOutcome, CreditLedger};
use crate::llm_client::ProviderError;
use crate::models::artifact::{
    ArtifactKind, ArtifactRef, ArtifactStatus, LetterLength, ProviderKind, Tone,
};
use crate::notifications::Notification;
use crate::state_machine::failure_plan;
use crate::storage::ArtifactRepository;
use crate::testing::{
    fixtures, server_error, FailingSink, FlakyStore, Harness, RecordingSink, ScriptedProvider,
};

const OPTIMIZED: &str = "JANE DOE\nSenior Backend Engineer\nRust, Go, distributed systems";

fn openai_ok() -> Arc<ScriptedProvider> {
    ScriptedProvider::always_ok(ProviderKind::OpenAi, OPTIMIZED)
}

fn anthropic_ok() -> Arc<ScriptedProvider> {
    ScriptedProvider::always_ok(ProviderKind::Anthropic, "Dear team, hello.")
}

#[tokio::test(start_paused = true)]
async fn test_optimize_end_to_end() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    let accepted = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    assert_eq!(accepted.status, ArtifactStatus::Processing);

    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Processing);

    let outcome = h.run_next().await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Succeeded {
            charge: Some(ChargeOutcome::Charged { remaining: 2 })
        }
    );

    let done = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(done.status, ArtifactStatus::Optimized);
    assert_eq!(done.optimized_content.as_deref(), Some(OPTIMIZED));
    assert_eq!(done.provider, Some(ProviderKind::OpenAi));
    assert_eq!(h.balance(user).await, 2);

    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        Notification::ArtifactUpdated(snapshot) => {
            assert_eq!(snapshot.status, ArtifactStatus::Optimized)
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_second_request_for_in_flight_artifact_is_rejected() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    let second = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await;

    assert!(matches!(second, Err(DispatchError::AlreadyInFlight)));
    assert!(h.queued().is_some());
    assert!(h.queued().is_none());

    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_reserved, 1);
}

#[tokio::test]
async fn test_in_flight_conflict_takes_precedence_over_balance() {
    let h = Harness::new(vec![openai_ok()]);
    let user = h.user(1).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    // The only credit is now held by the first request
    let second = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await;

    assert!(matches!(second, Err(DispatchError::AlreadyInFlight)));
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_reserved, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_never_overdraw() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(2).await;
    let mut resumes = Vec::new();
    for _ in 0..5 {
        resumes.push(h.resume(user).await);
    }

    let results = join_all(resumes.iter().map(|r| {
        h.dispatcher
            .request_generation(user, r.id, UseCase::Optimize, None)
    }))
    .await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::InsufficientCredits)))
        .count();
    assert_eq!(accepted, 2);
    assert_eq!(refused, 3);

    for _ in 0..accepted {
        h.run_next().await.unwrap();
    }
    assert_eq!(h.balance(user).await, 0);
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_reserved, 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_leaves_balance_untouched() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(0).await;
    h.store
        .set_subscription(user, Some(Utc::now() + ChronoDuration::days(30)))
        .await
        .unwrap();
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    let outcome = h.run_next().await.unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Succeeded {
            charge: Some(ChargeOutcome::Waived)
        }
    );
    assert_eq!(h.balance(user).await, 0);
}

#[tokio::test]
async fn test_no_credits_is_refused_before_any_transition() {
    let h = Harness::new(vec![openai_ok()]);
    let user = h.user(0).await;
    let resume = h.resume(user).await;

    let result = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await;

    assert!(matches!(result, Err(DispatchError::InsufficientCredits)));
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Draft);
}

#[tokio::test]
async fn test_short_resume_fails_validation() {
    let h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let mut new = fixtures::new_resume(user);
    new.original_content = "Too short".to_string();
    let resume = h.store.create_resume(new).await.unwrap();

    let result = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await;

    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert_eq!(h.store.account(user).await.unwrap().unwrap().credits_reserved, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_without_failed_notification() {
    let openai = ScriptedProvider::scripted(
        ProviderKind::OpenAi,
        vec![Err(server_error()), Err(ProviderError::Timeout)],
        Some(OPTIMIZED),
    );
    let mut h = Harness::new(vec![openai.clone()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    let outcome = h.run_next().await.unwrap();

    assert!(matches!(outcome, JobOutcome::Succeeded { .. }));
    // three optimize attempts plus one keyword extraction
    assert_eq!(openai.calls(), 4);
    assert_eq!(updated_statuses(&h.sink), vec![ArtifactStatus::Optimized]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_and_release_credit() {
    let openai = ScriptedProvider::always_failing(ProviderKind::OpenAi);
    let mut h = Harness::new(vec![openai.clone()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    let outcome = h.run_next().await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(openai.calls(), 3);
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Failed);
    assert!(stored.optimized_content.is_none());
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 3);
    assert_eq!(account.credits_reserved, 0);
    assert_eq!(updated_statuses(&h.sink), vec![ArtifactStatus::Failed]);
}

fn updated_statuses(sink: &RecordingSink) -> Vec<ArtifactStatus> {
    sink.notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::ArtifactUpdated(s) => Some(s.status),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_storage_error_marks_failed_and_releases_hold() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();

    let flaky = Arc::new(FlakyStore::wrap(h.store.clone()).failing_complete());
    let runner = h.runner_with(flaky, h.sink.clone());
    let request = h.queued().unwrap();
    let result = runner.execute(request).await;

    assert!(matches!(result, Err(JobError::Store(_))));
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Failed);
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 3);
    assert_eq!(account.credits_reserved, 0);
    assert_eq!(updated_statuses(&h.sink), vec![ArtifactStatus::Failed]);

    // Not stuck in flight: a new request is accepted
    let again = h
        .dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    assert_eq!(again.status, ArtifactStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_change_outcome() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();

    let runner = h.runner_with(Arc::new(h.store.clone()), Arc::new(FailingSink));
    let request = h.queued().unwrap();
    let outcome = runner.execute(request).await.unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Succeeded {
            charge: Some(ChargeOutcome::Charged { remaining: 2 })
        }
    );
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Optimized);
}

#[tokio::test]
async fn test_artifact_that_left_in_flight_is_skipped() {
    let openai = openai_ok();
    let mut h = Harness::new(vec![openai.clone()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    h.store
        .transition(
            ArtifactRef::resume(resume.id),
            &failure_plan(ArtifactKind::Resume),
        )
        .await
        .unwrap();

    let outcome = h.run_next().await.unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Skipped {
            current: ArtifactStatus::Failed
        }
    );
    assert_eq!(openai.calls(), 0);
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 3);
    assert_eq!(account.credits_reserved, 0);
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_request_surfaces_after_budget() {
    let rejected = || {
        Err(ProviderError::Api {
            status: 400,
            message: "bad request".to_string(),
        })
    };
    let openai = ScriptedProvider::scripted(
        ProviderKind::OpenAi,
        vec![rejected(), rejected(), rejected()],
        Some(OPTIMIZED),
    );
    let mut h = Harness::new(vec![openai.clone()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    let result = h.run_next().await;

    assert!(matches!(result, Err(JobError::Unexpected { .. })));
    assert_eq!(openai.calls(), 3);
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArtifactStatus::Failed);
    assert_eq!(h.balance(user).await, 3);
}

#[tokio::test]
async fn test_deleted_artifact_is_discarded() {
    let mut h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    assert!(h.store.delete_resume(resume.id).await.unwrap());

    let outcome = h.run_next().await.unwrap();
    assert_eq!(outcome, JobOutcome::Discarded);
    let account = h.store.account(user).await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 3);
    assert_eq!(account.credits_reserved, 0);
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ats_score_is_not_metered() {
    let openai = ScriptedProvider::always_ok(
        ProviderKind::OpenAi,
        "ATS Score: 82\nStrong keyword alignment with the posting. Quantified achievements \
         and a plain skills section keep the document easy to parse.",
    );
    let mut h = Harness::new(vec![openai]);
    let user = h.user(1).await;
    let resume = h.resume(user).await;

    h.dispatcher
        .request_generation(user, resume.id, UseCase::Optimize, None)
        .await
        .unwrap();
    h.run_next().await.unwrap();
    assert_eq!(h.balance(user).await, 0);

    h.dispatcher
        .request_generation(user, resume.id, UseCase::AtsScore, None)
        .await
        .unwrap();
    let outcome = h.run_next().await.unwrap();

    assert_eq!(outcome, JobOutcome::Succeeded { charge: None });
    let stored = h.store.resume(resume.id).await.unwrap().unwrap();
    assert_eq!(stored.ats_score, Some(82));
    assert_eq!(stored.status, ArtifactStatus::Optimized);
}

#[tokio::test(start_paused = true)]
async fn test_tone_and_length_shape_the_request() {
    let openai = openai_ok();
    let anthropic = anthropic_ok();
    let mut h = Harness::new(vec![openai.clone(), anthropic.clone()]);
    let user = h.user(5).await;
    let resume = h.resume(user).await;

    let mut casual = fixtures::new_cover_letter(&resume);
    casual.tone = Tone::Casual;
    casual.length = LetterLength::Short;
    let casual = h.store.create_cover_letter(casual).await.unwrap();

    let mut formal = fixtures::new_cover_letter(&resume);
    formal.tone = Tone::Professional;
    formal.length = LetterLength::Long;
    let formal = h.store.create_cover_letter(formal).await.unwrap();

    for id in [casual.id, formal.id] {
        h.dispatcher
            .request_generation(user, id, UseCase::GenerateCoverLetter, None)
            .await
            .unwrap();
        h.run_next().await.unwrap();
    }

    let casual_req = anthropic.last_request().unwrap();
    let formal_req = openai.last_request().unwrap();
    assert!(casual_req.temperature > formal_req.temperature);
    assert!(casual_req.max_tokens < formal_req.max_tokens);

    let prompt = |req: &crate::llm_client::CompletionRequest| {
        req.messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert!(prompt(&casual_req).contains("200-250"));
    assert!(prompt(&formal_req).contains("450-600"));

    let letter = h.store.cover_letter(casual.id).await.unwrap().unwrap();
    assert_eq!(letter.status, ArtifactStatus::Generated);
    assert_eq!(letter.provider, Some(ProviderKind::Anthropic));
}

#[tokio::test(start_paused = true)]
async fn test_variation_count_is_clamped_and_partial_failures_tolerated() {
    let openai = ScriptedProvider::always_ok(ProviderKind::OpenAi, "Variation letter.");
    let anthropic = ScriptedProvider::always_failing(ProviderKind::Anthropic);
    let mut h = Harness::new(vec![openai, anthropic.clone()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    let source = h.generated_letter(&resume).await;

    let accepted = h
        .dispatcher
        .request_generation(user, source.id, UseCase::variations(7), None)
        .await
        .unwrap();
    assert_eq!(accepted.use_case, UseCase::GenerateVariations { count: 5 });

    let outcome = h.run_next().await.unwrap();
    let JobOutcome::VariationsFinished {
        created,
        failed,
        charge,
    } = outcome
    else {
        panic!("unexpected outcome {outcome:?}");
    };

    assert_eq!(created.len(), 3);
    assert_eq!(failed, 2);
    // indices 1 and 3, two attempts each
    assert_eq!(anthropic.calls(), 4);
    assert_eq!(charge, Some(ChargeOutcome::Charged { remaining: 0 }));

    for id in &created {
        let letter = h.store.cover_letter(*id).await.unwrap().unwrap();
        assert_eq!(letter.status, ArtifactStatus::Generated);
        assert_eq!(letter.company_name, source.company_name);
    }
    let unchanged = h.store.cover_letter(source.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, ArtifactStatus::Generated);
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_variation_counts_as_failed() {
    let mut h = Harness::new(vec![openai_ok(), anthropic_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    let source = h.generated_letter(&resume).await;
    h.dispatcher
        .request_generation(user, source.id, UseCase::variations(3), None)
        .await
        .unwrap();

    let flaky = Arc::new(FlakyStore::wrap(h.store.clone()).failing_letter_inserts(1));
    let runner = h.runner_with(flaky, h.sink.clone());
    let request = h.queued().unwrap();
    let outcome = runner.execute(request).await.unwrap();

    let JobOutcome::VariationsFinished {
        created,
        failed,
        charge,
    } = outcome
    else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(created.len(), 2);
    assert_eq!(failed, 1);
    assert_eq!(charge, Some(ChargeOutcome::Charged { remaining: 1 }));

    let notifications = h.sink.notifications();
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::VariationsReady { source_id, created, failed: 1 }
            if *source_id == source.id && created.len() == 2
    )));
}

#[tokio::test(start_paused = true)]
async fn test_variation_batch_not_charged_when_all_fail() {
    let mut h = Harness::new(vec![
        ScriptedProvider::always_failing(ProviderKind::OpenAi),
        ScriptedProvider::always_failing(ProviderKind::Anthropic),
    ]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    let source = h.generated_letter(&resume).await;

    h.dispatcher
        .request_generation(user, source.id, UseCase::variations(2), None)
        .await
        .unwrap();
    let outcome = h.run_next().await.unwrap();

    assert_eq!(
        outcome,
        JobOutcome::VariationsFinished {
            created: Vec::new(),
            failed: 2,
            charge: None
        }
    );
    assert_eq!(h.balance(user).await, 3);
}

#[tokio::test]
async fn test_variation_batches_are_exclusive_per_source() {
    let h = Harness::new(vec![openai_ok(), anthropic_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    let source = h.generated_letter(&resume).await;

    h.dispatcher
        .request_generation(user, source.id, UseCase::variations(3), None)
        .await
        .unwrap();
    let second = h
        .dispatcher
        .request_generation(user, source.id, UseCase::variations(3), None)
        .await;

    assert!(matches!(second, Err(DispatchError::AlreadyInFlight)));
}

#[tokio::test]
async fn test_variations_require_a_generated_source() {
    let h = Harness::new(vec![openai_ok()]);
    let user = h.user(3).await;
    let resume = h.resume(user).await;
    let draft = h.draft_letter(&resume).await;

    let result = h
        .dispatcher
        .request_generation(user, draft.id, UseCase::variations(2), None)
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::NotReady {
            current: ArtifactStatus::Draft
        })
    ));
}

#[tokio::test]
async fn test_other_users_artifact_is_not_found() {
    let h = Harness::new(vec![openai_ok()]);
    let owner = h.user(3).await;
    let intruder = h.user(3).await;
    let resume = h.resume(owner).await;

    let result = h
        .dispatcher
        .request_generation(intruder, resume.id, UseCase::Optimize, None)
        .await;

    assert!(matches!(result, Err(DispatchError::NotFound(_))));
}
