//! Hierarchical progress tracking: project → phases → tasks.
//!
//! Percentages are always `floor(100 * completed / total)`, and 0 when a
//! phase (or project) has no tasks. Forcing a phase status wins over task
//! rollup: `completed` pins 100% and checks every task, `not_started` pins
//! 0% and resets every task. Rollup runs only when no status was forced.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::storage::{NewPhase, PhaseRow, SavedProjectRow, Storage, TaskRow, UserRow};
use crate::AppContext;

pub const STATUS_NOT_STARTED: &str = "not_started";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";

/// Integer-division progress. 66 for 2/3, never 67.
pub fn percentage(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        completed * 100 / total
    }
}

/// Map a project's free-form duration hint to a week count.
pub fn duration_weeks(hint: Option<&str>) -> i64 {
    match hint {
        Some("1-2 months") => 8,
        Some("3-4 months") => 16,
        Some("5-6 months") => 24,
        Some("6+ months") => 30,
        _ => 15,
    }
}

/// The stock five-phase timeline, laid out back to back from `start`.
pub fn default_template(start: DateTime<Utc>) -> Vec<NewPhase> {
    let phases: [(&str, &str, i64, [&str; 5]); 5] = [
        (
            "Research & Planning",
            "Literature review, requirements gathering, project planning",
            3,
            [
                "Conduct literature review",
                "Define project scope and objectives",
                "Identify stakeholders and requirements",
                "Create project proposal",
                "Get supervisor approval",
            ],
        ),
        (
            "Design & Architecture",
            "System design, architecture planning, technology selection",
            2,
            [
                "Design system architecture",
                "Create data models/schemas",
                "Select technologies and frameworks",
                "Design user interface mockups",
                "Document design decisions",
            ],
        ),
        (
            "Development",
            "Implementation of core functionality",
            6,
            [
                "Set up development environment",
                "Implement core features",
                "Develop user interface",
                "Integrate components",
                "Code review and refactoring",
            ],
        ),
        (
            "Testing & Quality Assurance",
            "Testing, bug fixing, and quality improvements",
            2,
            [
                "Write unit tests",
                "Perform integration testing",
                "Conduct user acceptance testing",
                "Fix identified bugs",
                "Performance optimization",
            ],
        ),
        (
            "Documentation & Deployment",
            "Final documentation and project delivery",
            2,
            [
                "Write technical documentation",
                "Create user manual",
                "Prepare final report",
                "Deploy application",
                "Prepare presentation",
            ],
        ),
    ];

    let mut cursor = start;
    phases
        .iter()
        .enumerate()
        .map(|(idx, (name, description, weeks, tasks))| {
            let end = cursor + Duration::weeks(*weeks);
            let phase = NewPhase {
                phase_name: (*name).to_owned(),
                phase_order: idx as i64 + 1,
                description: (*description).to_owned(),
                estimated_duration_weeks: *weeks,
                start_date: cursor.to_rfc3339(),
                end_date: end.to_rfc3339(),
                tasks: tasks.iter().map(|t| (*t).to_owned()).collect(),
            };
            cursor = end;
            phase
        })
        .collect()
}

// ─── Inputs & views ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct InitializeInput {
    pub start_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePhaseInput {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomPhaseInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration_weeks: Option<i64>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomizeInput {
    pub phases: Vec<CustomPhaseInput>,
}

#[derive(Debug, Deserialize)]
pub struct AddTaskInput {
    pub phase_id: i64,
    pub task_name: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PhaseView {
    #[serde(flatten)]
    pub phase: PhaseRow,
    pub tasks: Vec<TaskRow>,
}

#[derive(Debug, Serialize)]
pub struct ProgressView {
    pub project: SavedProjectRow,
    pub phases: Vec<PhaseView>,
}

#[derive(Debug, Serialize)]
pub struct TaskToggleView {
    pub task: TaskRow,
    pub phase_progress: i64,
    pub project_progress: i64,
}

// ─── Ownership resolution ────────────────────────────────────────────────────

async fn owned_project(
    storage: &Storage,
    user: &UserRow,
    project_id: i64,
) -> ApiResult<SavedProjectRow> {
    let project = storage
        .get_saved_project(project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;
    if project.owner_id != user.id {
        return Err(ApiError::NotFound("project"));
    }
    Ok(project)
}

/// Resolve a phase through its owning project. Phases belonging to another
/// user's project are indistinguishable from missing ones.
async fn owned_phase(storage: &Storage, user: &UserRow, phase_id: i64) -> ApiResult<PhaseRow> {
    let phase = storage
        .get_phase(phase_id)
        .await?
        .ok_or(ApiError::NotFound("phase"))?;
    owned_project(storage, user, phase.saved_project_id).await?;
    Ok(phase)
}

async fn owned_task(storage: &Storage, user: &UserRow, task_id: i64) -> ApiResult<TaskRow> {
    let task = storage
        .get_task(task_id)
        .await?
        .ok_or(ApiError::NotFound("task"))?;
    owned_phase(storage, user, task.phase_id).await?;
    Ok(task)
}

fn parse_date(value: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::InvalidInput(format!("invalid RFC 3339 date {value:?}")))
}

// ─── Rollup ──────────────────────────────────────────────────────────────────

/// Recompute one phase's percentage from its tasks and persist it.
async fn rollup_phase(storage: &Storage, phase_id: i64) -> ApiResult<i64> {
    let (total, completed) = storage.phase_task_counts(phase_id).await?;
    let pct = percentage(completed, total);
    storage.set_phase_progress(phase_id, pct).await?;
    Ok(pct)
}

/// Recompute the project percentage from all tasks across all phases.
async fn rollup_project_percentage(storage: &Storage, project_id: i64) -> ApiResult<i64> {
    let (total, completed) = storage.project_task_counts(project_id).await?;
    let pct = percentage(completed, total);
    storage.set_project_progress(project_id, pct).await?;
    Ok(pct)
}

/// Propagate phase statuses up to the project: all completed → `completed`
/// (with a completion stamp), any in progress → `in_progress`.
async fn rollup_project_status(storage: &Storage, project_id: i64) -> ApiResult<()> {
    let phases = storage.list_phases(project_id).await?;
    if phases.is_empty() {
        return Ok(());
    }
    if phases.iter().all(|p| p.status == STATUS_COMPLETED) {
        storage
            .set_project_status(project_id, STATUS_COMPLETED, Some(&Utc::now().to_rfc3339()))
            .await?;
    } else if phases.iter().any(|p| p.status == STATUS_IN_PROGRESS) {
        storage
            .set_project_status(project_id, STATUS_IN_PROGRESS, None)
            .await?;
    }
    Ok(())
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Enable progress tracking on a project and materialize the default
/// timeline. Idempotence is rejected loudly: a second call is a conflict.
pub async fn initialize(
    ctx: &AppContext,
    user: &UserRow,
    project_id: i64,
    input: InitializeInput,
) -> ApiResult<ProgressView> {
    let project = owned_project(&ctx.storage, user, project_id).await?;
    if project.progress_tracking_enabled {
        return Err(ApiError::Conflict(
            "progress tracking is already enabled".into(),
        ));
    }
    let start = match input.start_date.as_deref() {
        Some(value) => parse_date(value)?,
        None => Utc::now(),
    };
    let weeks = duration_weeks(project.duration_hint.as_deref());
    let expected = start + Duration::weeks(weeks);
    ctx.storage
        .enable_progress_tracking(project_id, &start.to_rfc3339(), &expected.to_rfc3339())
        .await?;
    ctx.storage
        .create_phases(project_id, &default_template(start), false)
        .await?;
    tracing::info!(project_id, "progress tracking initialized");
    get_progress(ctx, user, project_id).await
}

/// Full progress view. Also refreshes the stored project percentage so the
/// read is self-healing after out-of-band task edits.
pub async fn get_progress(
    ctx: &AppContext,
    user: &UserRow,
    project_id: i64,
) -> ApiResult<ProgressView> {
    owned_project(&ctx.storage, user, project_id).await?;
    let phases = ctx.storage.list_phases(project_id).await?;
    if !phases.is_empty() {
        rollup_project_percentage(&ctx.storage, project_id).await?;
    }
    let project = ctx
        .storage
        .get_saved_project(project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;
    let mut views = Vec::with_capacity(phases.len());
    for phase in phases {
        let tasks = ctx.storage.list_tasks(phase.id).await?;
        views.push(PhaseView { phase, tasks });
    }
    Ok(ProgressView {
        project,
        phases: views,
    })
}

/// Update a phase. A forced status (`completed` / `not_started`) overrides
/// task rollup for this phase; otherwise the percentage is recomputed from
/// the tasks. The project rollup always runs afterwards.
pub async fn update_phase(
    ctx: &AppContext,
    user: &UserRow,
    phase_id: i64,
    input: UpdatePhaseInput,
) -> ApiResult<PhaseView> {
    let phase = owned_phase(&ctx.storage, user, phase_id).await?;
    let project_id = phase.saved_project_id;

    if let Some(value) = input.start_date.as_deref() {
        parse_date(value)?;
    }
    if let Some(value) = input.end_date.as_deref() {
        parse_date(value)?;
    }

    let mut forced = false;
    if let Some(status) = input.status.as_deref() {
        match status {
            STATUS_COMPLETED => {
                ctx.storage.force_phase_completed(phase_id).await?;
                forced = true;
            }
            STATUS_NOT_STARTED => {
                ctx.storage.force_phase_reset(phase_id).await?;
                forced = true;
            }
            STATUS_IN_PROGRESS => {
                ctx.storage.set_phase_status(phase_id, STATUS_IN_PROGRESS).await?;
            }
            other => {
                return Err(ApiError::InvalidInput(format!(
                    "unknown phase status {other:?}"
                )))
            }
        }
    }

    ctx.storage
        .update_phase_fields(
            phase_id,
            input.notes.as_deref(),
            input.start_date.as_deref(),
            input.end_date.as_deref(),
        )
        .await?;

    if !forced {
        let (total, _) = ctx.storage.phase_task_counts(phase_id).await?;
        if total > 0 {
            rollup_phase(&ctx.storage, phase_id).await?;
        }
    }

    rollup_project_percentage(&ctx.storage, project_id).await?;
    rollup_project_status(&ctx.storage, project_id).await?;

    let phase = ctx
        .storage
        .get_phase(phase_id)
        .await?
        .ok_or(ApiError::NotFound("phase"))?;
    let tasks = ctx.storage.list_tasks(phase_id).await?;
    Ok(PhaseView { phase, tasks })
}

/// Flip a task's completion flag and roll the change up through its phase
/// and project. Reaching 100% promotes the phase to `completed`; the first
/// completed task promotes a `not_started` phase to `in_progress`.
pub async fn toggle_task(
    ctx: &AppContext,
    user: &UserRow,
    task_id: i64,
) -> ApiResult<TaskToggleView> {
    let task = owned_task(&ctx.storage, user, task_id).await?;
    let now_completed = !task.is_completed;
    let completed_at = now_completed.then(|| Utc::now().to_rfc3339());
    ctx.storage
        .set_task_completion(task_id, now_completed, completed_at.as_deref())
        .await?;

    let phase_progress = rollup_phase(&ctx.storage, task.phase_id).await?;
    let phase = ctx
        .storage
        .get_phase(task.phase_id)
        .await?
        .ok_or(ApiError::NotFound("phase"))?;
    if phase_progress == 100 {
        ctx.storage.mark_phase_completed(task.phase_id).await?;
    } else if phase_progress > 0 && phase.status == STATUS_NOT_STARTED {
        ctx.storage
            .set_phase_status(task.phase_id, STATUS_IN_PROGRESS)
            .await?;
    }

    let project_progress =
        rollup_project_percentage(&ctx.storage, phase.saved_project_id).await?;

    let task = ctx
        .storage
        .get_task(task_id)
        .await?
        .ok_or(ApiError::NotFound("task"))?;
    Ok(TaskToggleView {
        task,
        phase_progress,
        project_progress,
    })
}

/// Append a custom task at the end of a phase's checklist.
pub async fn add_task(ctx: &AppContext, user: &UserRow, input: AddTaskInput) -> ApiResult<TaskRow> {
    let name = input.task_name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidInput("task_name is required".into()));
    }
    if let Some(value) = input.due_date.as_deref() {
        parse_date(value)?;
    }
    owned_phase(&ctx.storage, user, input.phase_id).await?;
    Ok(ctx
        .storage
        .insert_task(
            input.phase_id,
            name,
            input.description.as_deref(),
            input.due_date.as_deref(),
        )
        .await?)
}

/// Delete a task and recompute its phase percentage. The project rollup is
/// the caller-visible read path's job; the phase is fixed here.
pub async fn delete_task(ctx: &AppContext, user: &UserRow, task_id: i64) -> ApiResult<()> {
    let task = owned_task(&ctx.storage, user, task_id).await?;
    ctx.storage.delete_task(task_id).await?;
    let (total, _) = ctx.storage.phase_task_counts(task.phase_id).await?;
    if total > 0 {
        rollup_phase(&ctx.storage, task.phase_id).await?;
    } else {
        ctx.storage.set_phase_progress(task.phase_id, 0).await?;
    }
    rollup_project_percentage(&ctx.storage, task_id_project(ctx, task.phase_id).await?).await?;
    Ok(())
}

async fn task_id_project(ctx: &AppContext, phase_id: i64) -> ApiResult<i64> {
    Ok(ctx
        .storage
        .get_phase(phase_id)
        .await?
        .ok_or(ApiError::NotFound("phase"))?
        .saved_project_id)
}

/// Replace the entire timeline with custom phases. All-or-nothing: the old
/// phases are deleted and the new set inserted in one transaction, and the
/// project rollup is reset to `not_started` / 0%.
pub async fn customize(
    ctx: &AppContext,
    user: &UserRow,
    project_id: i64,
    input: CustomizeInput,
) -> ApiResult<ProgressView> {
    owned_project(&ctx.storage, user, project_id).await?;
    if input.phases.is_empty() {
        return Err(ApiError::InvalidInput("at least one phase is required".into()));
    }
    let mut cursor = Utc::now();
    let mut phases = Vec::with_capacity(input.phases.len());
    for (idx, entry) in input.phases.iter().enumerate() {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "phase {} has an empty name",
                idx + 1
            )));
        }
        let weeks = entry.duration_weeks.unwrap_or(2);
        if weeks < 1 {
            return Err(ApiError::InvalidInput(format!(
                "phase {name:?} has a non-positive duration"
            )));
        }
        let end = cursor + Duration::weeks(weeks);
        phases.push(NewPhase {
            phase_name: name.to_owned(),
            phase_order: idx as i64 + 1,
            description: entry.description.clone(),
            estimated_duration_weeks: weeks,
            start_date: cursor.to_rfc3339(),
            end_date: end.to_rfc3339(),
            tasks: entry.tasks.clone(),
        });
        cursor = end;
    }
    ctx.storage.create_phases(project_id, &phases, true).await?;
    tracing::info!(project_id, phase_count = phases.len(), "timeline customized");
    get_progress(ctx, user, project_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_floors() {
        assert_eq!(percentage(2, 3), 66);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(5, 0), 0);
    }

    #[test]
    fn duration_hint_mapping() {
        assert_eq!(duration_weeks(Some("1-2 months")), 8);
        assert_eq!(duration_weeks(Some("3-4 months")), 16);
        assert_eq!(duration_weeks(Some("5-6 months")), 24);
        assert_eq!(duration_weeks(Some("6+ months")), 30);
        assert_eq!(duration_weeks(Some("a while")), 15);
        assert_eq!(duration_weeks(None), 15);
    }

    #[test]
    fn default_template_is_contiguous() {
        let start = Utc::now();
        let phases = default_template(start);
        assert_eq!(phases.len(), 5);
        assert_eq!(
            phases.iter().map(|p| p.estimated_duration_weeks).sum::<i64>(),
            15
        );
        for pair in phases.windows(2) {
            assert_eq!(pair[0].end_date, pair[1].start_date);
        }
        assert!(phases.iter().all(|p| p.tasks.len() == 5));
    }
}
