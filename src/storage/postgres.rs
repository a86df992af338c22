use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::storage::traits::Storage;
use crate::types::{
    FaultEvent, Job, JobFilter, JobId, JobOrder, Machine, MachineId, MachineStatus, NewFaultEvent,
    NewJob, NewMachine, SensorVector, ValidationError,
};

const MACHINE_COLUMNS: &str =
    "id, name, location, status, health_score, temperature, vibration, current_load, updated_at";
const JOB_COLUMNS: &str = "id, name, machine_id, status, priority, start_time, end_time";
const FAULT_COLUMNS: &str = "id, machine_id, fault_type, severity, component, detected_at, resolved";

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn insert_machine(&self, machine: NewMachine) -> Result<Machine> {
        machine.validate()?;
        let pinned = machine.id;

        let sql = format!(
            r#"
            INSERT INTO machines (id, name, location, status, health_score,
                                  temperature, vibration, current_load, updated_at)
            VALUES (COALESCE($1, nextval(pg_get_serial_sequence('machines', 'id'))),
                    $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING {MACHINE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(pinned)
            .bind(&machine.name)
            .bind(&machine.location)
            .bind(machine.status.as_str())
            .bind(machine.health_score)
            .bind(machine.sensors.temperature)
            .bind(machine.sensors.vibration)
            .bind(machine.sensors.current_load)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match pinned {
                Some(id) if is_unique_violation(&e) => {
                    anyhow::Error::from(ValidationError::DuplicateMachine(id))
                }
                _ => anyhow::Error::from(e),
            })?;

        if pinned.is_some() {
            sqlx::query(
                r#"
                SELECT setval(pg_get_serial_sequence('machines', 'id'),
                              GREATEST((SELECT MAX(id) FROM machines), 1))
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        row_to_machine(&row)
    }

    async fn get_machine(&self, id: MachineId) -> Result<Option<Machine>> {
        let sql = format!("SELECT {MACHINE_COLUMNS} FROM machines WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_machine).transpose()
    }

    async fn list_machines(&self, status: Option<MachineStatus>) -> Result<Vec<Machine>> {
        let sql = format!(
            r#"
            SELECT {MACHINE_COLUMNS}
            FROM machines
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_machine).collect()
    }

    async fn update_machine(&self, machine: &Machine) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE machines
            SET name = $2, location = $3, status = $4, health_score = $5,
                temperature = $6, vibration = $7, current_load = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(machine.id)
        .bind(&machine.name)
        .bind(&machine.location)
        .bind(machine.status.as_str())
        .bind(machine.health_score)
        .bind(machine.temperature)
        .bind(machine.vibration)
        .bind(machine.current_load)
        .bind(machine.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("machine {} not found", machine.id));
        }
        Ok(())
    }

    async fn update_machine_telemetry(
        &self,
        id: MachineId,
        reading: SensorVector,
        at: DateTime<Utc>,
    ) -> Result<Option<Machine>> {
        let sql = format!(
            r#"
            UPDATE machines
            SET temperature = $2, vibration = $3, current_load = $4, updated_at = $5
            WHERE id = $1
            RETURNING {MACHINE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(reading.temperature)
            .bind(reading.vibration)
            .bind(reading.current_load)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_machine).transpose()
    }

    async fn delete_machine(&self, id: MachineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM machines WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job> {
        job.validate()?;

        let sql = format!(
            r#"
            INSERT INTO jobs (name, machine_id, status, priority, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(job.name.trim())
            .bind(job.machine_id)
            .bind(job.status.as_str())
            .bind(job.priority.as_str())
            .bind(job.start_time)
            .bind(job.end_time)
            .fetch_one(&self.pool)
            .await?;

        row_to_job(&row)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let order = match filter.order {
            JobOrder::Id => "id ASC",
            JobOrder::StartTime => "start_time ASC, id ASC",
        };
        let statuses: Option<Vec<String>> = filter
            .statuses
            .as_ref()
            .map(|s| s.iter().map(|st| st.as_str().to_string()).collect());

        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::BIGINT IS NULL OR machine_id = $1)
              AND ($2::TEXT[] IS NULL OR status = ANY($2))
            ORDER BY {order}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.machine_id)
            .bind(statuses)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn assign_job(&self, id: JobId, machine_id: MachineId) -> Result<Job> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET machine_id = $2
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(machine_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("job {} not found", id))?;

        row_to_job(&row)
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_fault_event(&self, event: NewFaultEvent) -> Result<FaultEvent> {
        let sql = format!(
            r#"
            INSERT INTO fault_events (machine_id, fault_type, severity, component, detected_at, resolved)
            VALUES ($1, $2, $3, $4, $5, false)
            RETURNING {FAULT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(event.machine_id)
            .bind(event.fault_type.as_str())
            .bind(event.severity.as_str())
            .bind(&event.component)
            .bind(event.detected_at)
            .fetch_one(&self.pool)
            .await?;

        row_to_fault(&row)
    }

    async fn list_fault_events(&self, machine_id: Option<MachineId>) -> Result<Vec<FaultEvent>> {
        let sql = format!(
            r#"
            SELECT {FAULT_COLUMNS}
            FROM fault_events
            WHERE ($1::BIGINT IS NULL OR machine_id = $1)
            ORDER BY detected_at DESC, id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(machine_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_fault).collect()
    }
}

fn row_to_machine(r: &PgRow) -> Result<Machine> {
    let status: String = r.get("status");
    Ok(Machine {
        id: r.get("id"),
        name: r.get("name"),
        location: r.get("location"),
        status: status.parse()?,
        health_score: r.get("health_score"),
        temperature: r.get("temperature"),
        vibration: r.get("vibration"),
        current_load: r.get("current_load"),
        updated_at: r.get("updated_at"),
    })
}

fn row_to_job(r: &PgRow) -> Result<Job> {
    let status: String = r.get("status");
    let priority: String = r.get("priority");
    Ok(Job {
        id: r.get("id"),
        name: r.get("name"),
        machine_id: r.get("machine_id"),
        status: status.parse()?,
        priority: priority.parse()?,
        start_time: r.get("start_time"),
        end_time: r.get("end_time"),
    })
}

fn row_to_fault(r: &PgRow) -> Result<FaultEvent> {
    let fault_type: String = r.get("fault_type");
    let severity: String = r.get("severity");
    Ok(FaultEvent {
        id: r.get("id"),
        machine_id: r.get("machine_id"),
        fault_type: fault_type.parse()?,
        severity: severity.parse()?,
        component: r.get("component"),
        detected_at: r.get("detected_at"),
        resolved: r.get("resolved"),
    })
}
