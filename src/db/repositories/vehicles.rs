use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    guard::checked,
    helpers::{parse_datetime, parse_optional_datetime},
    models::VehicleRecord,
};

fn row_to_vehicle(row: &Row) -> Result<VehicleRecord> {
    let valid_from: Option<String> = row.get("valid_from")?;
    let valid_until: Option<String> = row.get("valid_until")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(VehicleRecord {
        plate: row.get("plate")?,
        holder_name: row.get("holder_name")?,
        holder_contact: row.get("holder_contact")?,
        valid_from: parse_optional_datetime(valid_from, "valid_from")?,
        valid_until: parse_optional_datetime(valid_until, "valid_until")?,
        slot: row.get("slot")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Registry provisioning. Existing plates keep their `created_at`.
    pub async fn upsert_vehicle(&self, vehicle: &VehicleRecord) -> Result<()> {
        let record = vehicle.clone();
        self.execute(move |conn| {
            conn.execute(
                checked(
                    "INSERT INTO vehicles (plate, holder_name, holder_contact, valid_from, valid_until, slot, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(plate) DO UPDATE SET
                         holder_name = excluded.holder_name,
                         holder_contact = excluded.holder_contact,
                         valid_from = excluded.valid_from,
                         valid_until = excluded.valid_until,
                         slot = excluded.slot,
                         updated_at = excluded.updated_at",
                )?,
                params![
                    record.plate,
                    record.holder_name,
                    record.holder_contact,
                    record.valid_from.map(|dt| dt.to_rfc3339()),
                    record.valid_until.map(|dt| dt.to_rfc3339()),
                    record.slot,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn find_vehicle(&self, plate: &str) -> Result<Option<VehicleRecord>> {
        let plate = plate.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(checked(
                "SELECT plate, holder_name, holder_contact, valid_from, valid_until, slot, created_at, updated_at
                 FROM vehicles
                 WHERE plate = ?1",
            )?)?;

            stmt.query_row(params![plate], |row| Ok(row_to_vehicle(row)))
                .optional()?
                .transpose()
        })
        .await
    }

    pub async fn count_vehicles(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row(checked("SELECT COUNT(*) FROM vehicles")?, [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_find_roundtrips_holder_metadata() {
        let db = Database::in_memory().expect("db");
        let mut vehicle = VehicleRecord::new("KA01AB1234");
        vehicle.holder_name = Some("Block C resident".into());
        vehicle.slot = Some("C-14".into());
        db.upsert_vehicle(&vehicle).await.expect("insert");

        vehicle.slot = Some("C-15".into());
        db.upsert_vehicle(&vehicle).await.expect("update");

        let found = db.find_vehicle("KA01AB1234").await.expect("query").expect("present");
        assert_eq!(found.slot.as_deref(), Some("C-15"));
        assert_eq!(found.holder_name.as_deref(), Some("Block C resident"));
        assert_eq!(db.count_vehicles().await.expect("count"), 1);
        assert!(db.find_vehicle("XX99ZZ0000").await.expect("query").is_none());
    }
}
