mod backup;
mod database;
mod records;

// Backup / recover commands
pub use backup::{run_backup, run_recover, run_recover_upload};

// Query commands
pub use records::{run_list_records, run_list_tasks};

// Managed database commands
pub use database::{add_database, list_databases};

/// 命令行指定的目标数据库
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub db_type: String,
    pub instance: String,
    pub database: String,
}

impl Target {
    pub fn new(db_type: String, instance: String, database: String) -> Self {
        Self {
            db_type,
            instance,
            database,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.db_type, self.instance, self.database)
    }
}
