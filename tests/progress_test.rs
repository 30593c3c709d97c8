//! Progress rollup semantics: floor percentages, status forcing, and
//! project-level propagation.

mod common;

use chrono::{DateTime, Utc};
use collabd::error::ApiError;
use collabd::progress::{
    self, AddTaskInput, CustomPhaseInput, CustomizeInput, InitializeInput, UpdatePhaseInput,
};
use collabd::storage::SavedProjectRow;
use collabd::AppContext;
use common::*;

async fn make_project(ctx: &AppContext, owner_id: i64, hint: Option<&str>) -> SavedProjectRow {
    ctx.storage
        .create_saved_project(owner_id, "Smart Campus Navigator", hint)
        .await
        .unwrap()
}

/// One phase, three tasks, no defaults in the way.
async fn three_task_project(ctx: &AppContext, user: &collabd::storage::UserRow) -> i64 {
    let project = make_project(ctx, user.id, None).await;
    progress::initialize(ctx, user, project.id, InitializeInput::default())
        .await
        .unwrap();
    progress::customize(
        ctx,
        user,
        project.id,
        CustomizeInput {
            phases: vec![CustomPhaseInput {
                name: "Build".to_string(),
                description: String::new(),
                duration_weeks: Some(4),
                tasks: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            }],
        },
    )
    .await
    .unwrap();
    project.id
}

#[tokio::test]
async fn initialize_materializes_the_default_timeline() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project = make_project(&ctx, alice.id, Some("3-4 months")).await;

    let view = progress::initialize(&ctx, &alice, project.id, InitializeInput::default())
        .await
        .unwrap();

    assert_eq!(view.phases.len(), 5);
    assert_eq!(
        view.phases.iter().map(|p| p.tasks.len()).sum::<usize>(),
        25
    );
    assert!(view.project.progress_tracking_enabled);
    assert_eq!(view.project.status, "not_started");
    assert_eq!(view.project.progress_percentage, 0);

    // "3-4 months" maps to a 16-week expected completion window.
    let start: DateTime<Utc> = view.project.start_date.as_deref().unwrap().parse().unwrap();
    let expected: DateTime<Utc> = view
        .project
        .expected_completion_date
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!((expected - start).num_weeks(), 16);

    // Phases tile the timeline without gaps.
    for pair in view.phases.windows(2) {
        assert_eq!(pair[0].phase.end_date, pair[1].phase.start_date);
    }
}

#[tokio::test]
async fn initialize_twice_is_a_conflict() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project = make_project(&ctx, alice.id, None).await;
    progress::initialize(&ctx, &alice, project.id, InitializeInput::default())
        .await
        .unwrap();
    let err = progress::initialize(&ctx, &alice, project.id, InitializeInput::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn two_of_three_tasks_is_66_percent_not_67() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project_id = three_task_project(&ctx, &alice).await;

    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let tasks: Vec<i64> = view.phases[0].tasks.iter().map(|t| t.id).collect();

    let first = progress::toggle_task(&ctx, &alice, tasks[0]).await.unwrap();
    assert_eq!(first.phase_progress, 33);

    let second = progress::toggle_task(&ctx, &alice, tasks[1]).await.unwrap();
    assert_eq!(second.phase_progress, 66);
    assert_eq!(second.project_progress, 66);

    let phase = ctx.storage.get_phase(view.phases[0].phase.id).await.unwrap().unwrap();
    assert_eq!(phase.status, "in_progress");

    let third = progress::toggle_task(&ctx, &alice, tasks[2]).await.unwrap();
    assert_eq!(third.phase_progress, 100);
    let phase = ctx.storage.get_phase(phase.id).await.unwrap().unwrap();
    assert_eq!(phase.status, "completed");
    assert!(phase.actual_completion_date.is_some());
}

#[tokio::test]
async fn untoggling_brings_the_percentage_back_down() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project_id = three_task_project(&ctx, &alice).await;
    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let task_id = view.phases[0].tasks[0].id;

    let on = progress::toggle_task(&ctx, &alice, task_id).await.unwrap();
    assert!(on.task.is_completed);
    assert!(on.task.completed_at.is_some());

    let off = progress::toggle_task(&ctx, &alice, task_id).await.unwrap();
    assert!(!off.task.is_completed);
    assert!(off.task.completed_at.is_none());
    assert_eq!(off.phase_progress, 0);
    assert_eq!(off.project_progress, 0);
}

#[tokio::test]
async fn forcing_completed_wins_over_task_state() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project_id = three_task_project(&ctx, &alice).await;
    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let phase_id = view.phases[0].phase.id;

    let forced = progress::update_phase(
        &ctx,
        &alice,
        phase_id,
        UpdatePhaseInput {
            status: Some("completed".to_string()),
            notes: None,
            start_date: None,
            end_date: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(forced.phase.progress_percentage, 100);
    assert_eq!(forced.phase.status, "completed");
    assert!(forced.phase.actual_completion_date.is_some());
    assert!(forced.tasks.iter().all(|t| t.is_completed));

    // The only phase is complete, so the project follows.
    let project = ctx.storage.get_saved_project(project_id).await.unwrap().unwrap();
    assert_eq!(project.status, "completed");
    assert_eq!(project.progress_percentage, 100);
    assert!(project.actual_completion_date.is_some());
}

#[tokio::test]
async fn forcing_not_started_resets_everything() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project_id = three_task_project(&ctx, &alice).await;
    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let phase_id = view.phases[0].phase.id;
    for task in &view.phases[0].tasks {
        progress::toggle_task(&ctx, &alice, task.id).await.unwrap();
    }

    let reset = progress::update_phase(
        &ctx,
        &alice,
        phase_id,
        UpdatePhaseInput {
            status: Some("not_started".to_string()),
            notes: None,
            start_date: None,
            end_date: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(reset.phase.progress_percentage, 0);
    assert_eq!(reset.phase.status, "not_started");
    assert!(reset.phase.actual_completion_date.is_none());
    assert!(reset.tasks.iter().all(|t| !t.is_completed && t.completed_at.is_none()));
}

#[tokio::test]
async fn project_percentage_sums_tasks_across_phases() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project = make_project(&ctx, alice.id, None).await;
    progress::initialize(&ctx, &alice, project.id, InitializeInput::default())
        .await
        .unwrap();
    progress::customize(
        &ctx,
        &alice,
        project.id,
        CustomizeInput {
            phases: vec![
                CustomPhaseInput {
                    name: "One".to_string(),
                    description: String::new(),
                    duration_weeks: Some(1),
                    tasks: vec!["a".to_string(), "b".to_string()],
                },
                CustomPhaseInput {
                    name: "Two".to_string(),
                    description: String::new(),
                    duration_weeks: Some(1),
                    tasks: vec!["c".to_string(), "d".to_string(), "e".to_string()],
                },
            ],
        },
    )
    .await
    .unwrap();

    let view = progress::get_progress(&ctx, &alice, project.id).await.unwrap();
    let first_phase_tasks: Vec<i64> = view.phases[0].tasks.iter().map(|t| t.id).collect();
    progress::toggle_task(&ctx, &alice, first_phase_tasks[0]).await.unwrap();
    let result = progress::toggle_task(&ctx, &alice, first_phase_tasks[1]).await.unwrap();

    // Phase one is 2/2; the project is 2/5.
    assert_eq!(result.phase_progress, 100);
    assert_eq!(result.project_progress, 40);
}

#[tokio::test]
async fn customize_replaces_the_timeline_atomically() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project = make_project(&ctx, alice.id, None).await;
    progress::initialize(&ctx, &alice, project.id, InitializeInput::default())
        .await
        .unwrap();

    // Complete a default task, then replace the timeline.
    let before = progress::get_progress(&ctx, &alice, project.id).await.unwrap();
    progress::toggle_task(&ctx, &alice, before.phases[0].tasks[0].id)
        .await
        .unwrap();

    let after = progress::customize(
        &ctx,
        &alice,
        project.id,
        CustomizeInput {
            phases: vec![CustomPhaseInput {
                name: "Sprint".to_string(),
                description: "Two-week burst".to_string(),
                duration_weeks: None,
                tasks: vec!["ship".to_string()],
            }],
        },
    )
    .await
    .unwrap();

    assert_eq!(after.phases.len(), 1);
    assert_eq!(after.phases[0].phase.phase_name, "Sprint");
    assert_eq!(after.phases[0].phase.estimated_duration_weeks, Some(2));
    assert_eq!(after.phases[0].tasks.len(), 1);
    assert_eq!(after.project.status, "not_started");
    assert_eq!(after.project.progress_percentage, 0);

    // Old phases and their tasks are gone from storage entirely.
    let (total, completed) = ctx.storage.project_task_counts(project.id).await.unwrap();
    assert_eq!((total, completed), (1, 0));
}

#[tokio::test]
async fn customize_rejects_an_empty_phase_list() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project = make_project(&ctx, alice.id, None).await;
    let err = progress::customize(&ctx, &alice, project.id, CustomizeInput { phases: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn added_tasks_append_and_deleted_tasks_recompute() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let project_id = three_task_project(&ctx, &alice).await;
    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let phase_id = view.phases[0].phase.id;
    let tasks: Vec<i64> = view.phases[0].tasks.iter().map(|t| t.id).collect();

    let added = progress::add_task(
        &ctx,
        &alice,
        AddTaskInput {
            phase_id,
            task_name: "Polish".to_string(),
            description: None,
            due_date: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(added.task_order, 4);

    // 2 of 4 complete — 50%. Deleting an incomplete task makes it 2 of 3 — 66%.
    progress::toggle_task(&ctx, &alice, tasks[0]).await.unwrap();
    progress::toggle_task(&ctx, &alice, tasks[1]).await.unwrap();
    progress::delete_task(&ctx, &alice, added.id).await.unwrap();
    let phase = ctx.storage.get_phase(phase_id).await.unwrap().unwrap();
    assert_eq!(phase.progress_percentage, 66);
}

#[tokio::test]
async fn other_users_projects_are_invisible() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let mallory = make_user(&ctx, "mallory@example.com", "Mallory").await;
    let project_id = three_task_project(&ctx, &alice).await;
    let view = progress::get_progress(&ctx, &alice, project_id).await.unwrap();
    let task_id = view.phases[0].tasks[0].id;

    let err = progress::get_progress(&ctx, &mallory, project_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    let err = progress::toggle_task(&ctx, &mallory, task_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
