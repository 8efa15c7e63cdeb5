use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::{Entity, Job, Run, Status, Step, Store, StoreError, check_finish, check_transition};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct RunRow {
  id: String,
  repo: String,
  workflow_name: String,
  branch: String,
  commit_sha: String,
  commit_message: String,
  triggered_by: String,
  status: Status,
  created_at: DateTime<Utc>,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct JobRow {
  id: String,
  run_id: String,
  position: i64,
  name: String,
  runs_on: String,
  status: Status,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct StepRow {
  id: String,
  job_id: String,
  position: i64,
  name: String,
  command: Option<String>,
  uses: Option<String>,
  status: Status,
  output: String,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
}

impl From<StepRow> for Step {
  fn from(row: StepRow) -> Self {
    Step {
      id: row.id,
      job_id: row.job_id,
      position: row.position,
      name: row.name,
      command: row.command,
      uses: row.uses,
      status: row.status,
      output: row.output,
      started_at: row.started_at,
      completed_at: row.completed_at,
    }
  }
}

const RUN_COLUMNS: &str = "id, repo, workflow_name, branch, commit_sha, commit_message, triggered_by, status, created_at, started_at, completed_at";

impl Entity {
  fn table(self) -> &'static str {
    match self {
      Entity::Run => "runs",
      Entity::Job => "jobs",
      Entity::Step => "steps",
    }
  }
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn current_status(&self, entity: Entity, id: &str) -> Result<Status, StoreError> {
    let sql = format!("SELECT status FROM {} WHERE id = ?", entity.table());
    let status: Option<Status> = sqlx::query_scalar(&sql)
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    status.ok_or_else(|| StoreError::not_found(entity, id))
  }

  /// Guard an UPDATE that was conditioned on the previously read status.
  fn ensure_applied(
    rows_affected: u64,
    entity: Entity,
    id: &str,
    from: Status,
    to: Status,
  ) -> Result<(), StoreError> {
    if rows_affected == 0 {
      return Err(StoreError::InvalidTransition {
        entity,
        id: id.to_string(),
        from,
        to,
      });
    }
    Ok(())
  }

  async fn start(&self, entity: Entity, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let from = self.current_status(entity, id).await?;
    check_transition(entity, id, from, Status::InProgress)?;

    let sql = format!(
      "UPDATE {} SET status = ?, started_at = ? WHERE id = ? AND status = ?",
      entity.table()
    );
    let result = sqlx::query(&sql)
      .bind(Status::InProgress)
      .bind(at)
      .bind(id)
      .bind(from)
      .execute(&self.pool)
      .await?;

    Self::ensure_applied(result.rows_affected(), entity, id, from, Status::InProgress)
  }

  async fn finish(
    &self,
    entity: Entity,
    id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let from = self.current_status(entity, id).await?;
    check_finish(entity, id, from, status)?;

    let sql = format!(
      "UPDATE {} SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
      entity.table()
    );
    let result = sqlx::query(&sql)
      .bind(status)
      .bind(at)
      .bind(id)
      .bind(from)
      .execute(&self.pool)
      .await?;

    Self::ensure_applied(result.rows_affected(), entity, id, from, status)
  }

  /// Load the jobs and steps of a run row.
  async fn load_run(&self, row: RunRow) -> Result<Run, StoreError> {
    let job_rows: Vec<JobRow> = sqlx::query_as(
      r#"
      SELECT id, run_id, position, name, runs_on, status, started_at, completed_at
      FROM jobs
      WHERE run_id = ?
      ORDER BY position ASC
      "#,
    )
    .bind(&row.id)
    .fetch_all(&self.pool)
    .await?;

    let step_rows: Vec<StepRow> = sqlx::query_as(
      r#"
      SELECT s.id, s.job_id, s.position, s.name, s.command, s.uses, s.status, s.output,
             s.started_at, s.completed_at
      FROM steps s
      JOIN jobs j ON s.job_id = j.id
      WHERE j.run_id = ?
      ORDER BY j.position ASC, s.position ASC
      "#,
    )
    .bind(&row.id)
    .fetch_all(&self.pool)
    .await?;

    let mut jobs: Vec<Job> = job_rows
      .into_iter()
      .map(|j| Job {
        id: j.id,
        run_id: j.run_id,
        position: j.position,
        name: j.name,
        runs_on: j.runs_on,
        status: j.status,
        started_at: j.started_at,
        completed_at: j.completed_at,
        steps: Vec::new(),
      })
      .collect();

    for step in step_rows {
      if let Some(job) = jobs.iter_mut().find(|j| j.id == step.job_id) {
        job.steps.push(step.into());
      }
    }

    Ok(Run {
      id: row.id,
      repo: row.repo,
      workflow_name: row.workflow_name,
      branch: row.branch,
      commit_sha: row.commit_sha,
      commit_message: row.commit_message,
      triggered_by: row.triggered_by,
      status: row.status,
      created_at: row.created_at,
      started_at: row.started_at,
      completed_at: row.completed_at,
      jobs,
    })
  }

  async fn load_runs(&self, rows: Vec<RunRow>) -> Result<Vec<Run>, StoreError> {
    let mut runs = Vec::with_capacity(rows.len());
    for row in rows {
      runs.push(self.load_run(row).await?);
    }
    Ok(runs)
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
      INSERT INTO runs (id, repo, workflow_name, branch, commit_sha, commit_message, triggered_by, status, created_at, started_at, completed_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&run.id)
    .bind(&run.repo)
    .bind(&run.workflow_name)
    .bind(&run.branch)
    .bind(&run.commit_sha)
    .bind(&run.commit_message)
    .bind(&run.triggered_by)
    .bind(run.status)
    .bind(run.created_at)
    .bind(run.started_at)
    .bind(run.completed_at)
    .execute(&mut *tx)
    .await?;

    for job in &run.jobs {
      sqlx::query(
        r#"
        INSERT INTO jobs (id, run_id, position, name, runs_on, status, started_at, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
      )
      .bind(&job.id)
      .bind(&run.id)
      .bind(job.position)
      .bind(&job.name)
      .bind(&job.runs_on)
      .bind(job.status)
      .bind(job.started_at)
      .bind(job.completed_at)
      .execute(&mut *tx)
      .await?;

      for step in &job.steps {
        sqlx::query(
          r#"
          INSERT INTO steps (id, job_id, position, name, command, uses, status, output, started_at, completed_at)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          "#,
        )
        .bind(&step.id)
        .bind(&job.id)
        .bind(step.position)
        .bind(&step.name)
        .bind(&step.command)
        .bind(&step.uses)
        .bind(step.status)
        .bind(&step.output)
        .bind(step.started_at)
        .bind(step.completed_at)
        .execute(&mut *tx)
        .await?;
      }
    }

    tx.commit().await?;
    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?");
    let row: Option<RunRow> = sqlx::query_as(&sql)
      .bind(run_id)
      .fetch_optional(&self.pool)
      .await?;

    match row {
      Some(row) => self.load_run(row).await,
      None => Err(StoreError::not_found(Entity::Run, run_id)),
    }
  }

  async fn list_runs(&self, repo: &str) -> Result<Vec<Run>, StoreError> {
    let sql =
      format!("SELECT {RUN_COLUMNS} FROM runs WHERE repo = ? ORDER BY created_at DESC, rowid DESC");
    let rows: Vec<RunRow> = sqlx::query_as(&sql)
      .bind(repo)
      .fetch_all(&self.pool)
      .await?;
    self.load_runs(rows).await
  }

  async fn list_runs_with_status(&self, status: Status) -> Result<Vec<Run>, StoreError> {
    let sql =
      format!("SELECT {RUN_COLUMNS} FROM runs WHERE status = ? ORDER BY created_at ASC, rowid ASC");
    let rows: Vec<RunRow> = sqlx::query_as(&sql)
      .bind(status)
      .fetch_all(&self.pool)
      .await?;
    self.load_runs(rows).await
  }

  async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM steps WHERE job_id IN (SELECT id FROM jobs WHERE run_id = ?)")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM jobs WHERE run_id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    let result = sqlx::query("DELETE FROM runs WHERE id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::not_found(Entity::Run, run_id));
    }

    tx.commit().await?;
    Ok(())
  }

  async fn start_run(&self, run_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    self.start(Entity::Run, run_id, at).await
  }

  async fn finish_run(
    &self,
    run_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    self.finish(Entity::Run, run_id, status, at).await
  }

  async fn start_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    self.start(Entity::Job, job_id, at).await
  }

  async fn finish_job(
    &self,
    job_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    self.finish(Entity::Job, job_id, status, at).await
  }

  async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let from = self.current_status(Entity::Job, job_id).await?;
    if from != Status::Queued {
      return Err(StoreError::InvalidTransition {
        entity: Entity::Job,
        id: job_id.to_string(),
        from,
        to: Status::Cancelled,
      });
    }

    let mut tx = self.pool.begin().await?;
    let result = sqlx::query(
      "UPDATE jobs SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
    )
    .bind(Status::Cancelled)
    .bind(at)
    .bind(job_id)
    .bind(Status::Queued)
    .execute(&mut *tx)
    .await?;
    Self::ensure_applied(
      result.rows_affected(),
      Entity::Job,
      job_id,
      from,
      Status::Cancelled,
    )?;

    sqlx::query("UPDATE steps SET status = ?, completed_at = ? WHERE job_id = ? AND status = ?")
      .bind(Status::Cancelled)
      .bind(at)
      .bind(job_id)
      .bind(Status::Queued)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(())
  }

  async fn start_step(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    self.start(Entity::Step, step_id, at).await
  }

  async fn record_step_result(
    &self,
    step_id: &str,
    status: Status,
    output: &str,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let from = self.current_status(Entity::Step, step_id).await?;
    check_finish(Entity::Step, step_id, from, status)?;

    let result = sqlx::query(
      "UPDATE steps SET status = ?, output = ?, completed_at = ? WHERE id = ? AND status = ?",
    )
    .bind(status)
    .bind(output)
    .bind(at)
    .bind(step_id)
    .bind(from)
    .execute(&self.pool)
    .await?;

    Self::ensure_applied(result.rows_affected(), Entity::Step, step_id, from, status)
  }

  async fn cancel_remaining_steps(
    &self,
    job_id: &str,
    at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    // Confirms the job exists.
    self.current_status(Entity::Job, job_id).await?;

    let result =
      sqlx::query("UPDATE steps SET status = ?, completed_at = ? WHERE job_id = ? AND status = ?")
        .bind(Status::Cancelled)
        .bind(at)
        .bind(job_id)
        .bind(Status::Queued)
        .execute(&self.pool)
        .await?;

    Ok(result.rows_affected())
  }
}
