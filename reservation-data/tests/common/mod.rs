//! Shared fixtures: a small rail schema on in-memory SQLite

#![allow(dead_code)]

use std::sync::Arc;

use reservation_data::prelude::*;

/// Station with a store-generated id and a unique name
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub active: bool,
}

impl Station {
    pub fn new(name: &str, city: Option<&str>) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            city: city.map(str::to_string),
            active: true,
        }
    }
}

impl Entity for Station {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("Stations")
            .column(ColumnDef::new("id", DeclaredType::required(ValueType::Int)).key().computed())
            .column(ColumnDef::new("name", DeclaredType::required(ValueType::Text)))
            .column(ColumnDef::new("city", DeclaredType::nullable(ValueType::Text)))
            .column(ColumnDef::new("active", DeclaredType::required(ValueType::Bool)).column("is_active"))
    }

    fn value(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "city" => self.city.clone().into(),
            "active" => self.active.into(),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()> {
        match member {
            "id" => assign(&mut self.id, member, value),
            "name" => assign(&mut self.name, member, value),
            "city" => assign(&mut self.city, member, value),
            "active" => assign(&mut self.active, member, value),
            _ => Err(unknown_member::<Self>(member)),
        }
    }
}

/// Trip departing from a station; `revision` is defaulted by the store
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Trip {
    pub id: i64,
    pub station_id: i64,
    pub fare: f64,
    pub revision: i64,
}

impl Trip {
    pub fn new(station_id: i64, fare: f64) -> Self {
        Self {
            station_id,
            fare,
            ..Self::default()
        }
    }
}

impl Entity for Trip {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("Trips")
            .column(ColumnDef::new("id", DeclaredType::required(ValueType::Int)).key().computed())
            .column(ColumnDef::new("station_id", DeclaredType::required(ValueType::Int)))
            .column(ColumnDef::new("fare", DeclaredType::required(ValueType::Float)))
            .column(ColumnDef::new("revision", DeclaredType::required(ValueType::Int)).computed())
    }

    fn value(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "station_id" => self.station_id.into(),
            "fare" => self.fare.into(),
            "revision" => self.revision.into(),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()> {
        match member {
            "id" => assign(&mut self.id, member, value),
            "station_id" => assign(&mut self.station_id, member, value),
            "fare" => assign(&mut self.fare, member, value),
            "revision" => assign(&mut self.revision, member, value),
            _ => Err(unknown_member::<Self>(member)),
        }
    }
}

/// Seat keyed by `(coach, number)` with no generated columns
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Seat {
    pub coach: i64,
    pub number: i64,
    pub class: String,
}

impl Seat {
    pub fn new(coach: i64, number: i64, class: &str) -> Self {
        Self {
            coach,
            number,
            class: class.to_string(),
        }
    }
}

impl Entity for Seat {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("Seats")
            .column(ColumnDef::new("coach", DeclaredType::required(ValueType::Int)).key())
            .column(ColumnDef::new("number", DeclaredType::required(ValueType::Int)).key())
            .column(ColumnDef::new("class", DeclaredType::required(ValueType::Text)))
    }

    fn value(&self, member: &str) -> Value {
        match member {
            "coach" => self.coach.into(),
            "number" => self.number.into(),
            "class" => self.class.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()> {
        match member {
            "coach" => assign(&mut self.coach, member, value),
            "number" => assign(&mut self.number, member, value),
            "class" => assign(&mut self.class, member, value),
            _ => Err(unknown_member::<Self>(member)),
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE \"Stations\" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        city TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE \"Trips\" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_id INTEGER NOT NULL REFERENCES \"Stations\"(id),
        fare REAL NOT NULL CHECK (fare >= 0),
        revision INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE \"Seats\" (
        coach INTEGER NOT NULL,
        number INTEGER NOT NULL,
        class TEXT NOT NULL,
        PRIMARY KEY (coach, number)
    )",
];

/// Fresh in-memory database with the schema applied
pub async fn setup() -> Arc<SqliteFactory> {
    let factory = SqliteFactory::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    {
        let mut conn = factory.open().await.expect("connection");
        conn.execute(&Command::new("PRAGMA foreign_keys = ON"))
            .await
            .expect("pragma");
        for statement in SCHEMA {
            conn.execute(&Command::new(*statement))
                .await
                .expect("schema");
        }
    }
    Arc::new(factory)
}

pub fn stations(factory: &Arc<SqliteFactory>) -> GenericRepository<Station, SqliteFactory> {
    GenericRepository::new(Arc::clone(factory))
}

pub fn trips(factory: &Arc<SqliteFactory>) -> GenericRepository<Trip, SqliteFactory> {
    GenericRepository::new(Arc::clone(factory))
}

pub fn seats(factory: &Arc<SqliteFactory>) -> GenericRepository<Seat, SqliteFactory> {
    GenericRepository::new(Arc::clone(factory))
}

/// Seed the standard set of stations, returning them with ids assigned
pub async fn seed_stations(repo: &GenericRepository<Station, SqliteFactory>) -> Vec<Station> {
    let mut seeded = vec![
        Station::new("Retiro", Some("Buenos Aires")),
        Station::new("Constitucion", Some("Buenos Aires")),
        Station::new("Once", Some("Buenos Aires")),
        Station::new("Tigre", Some("Tigre")),
        Station::new("Mar del Plata", Some("Mar del Plata")),
        Station::new("Apeadero Km 40", None),
    ];
    seeded[5].active = false;
    repo.create_bulk(&mut seeded, &CancellationToken::new())
        .await
        .expect("seed stations");
    seeded
}
