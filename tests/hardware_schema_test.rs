//! Loading the hardware audit configuration from disk.

use config_data_sql::ErrorKind;
use config_data_sql::schema::{HardwareSchema, Scope, TableMap};
use std::io::Write;
use tempfile::NamedTempFile;

const AUDIT_CONFIG: &str = r#"[
    {
        "Class": {"Type": "STRUCTURAL", "Super": ["DEVICE"], "Opsi": "BASE_BOARD", "WMI": "select * from Win32_BaseBoard"},
        "Values": [
            {"Type": "varchar(100)", "Scope": "g", "Opsi": "name", "WMI": "Name"},
            {"Type": "varchar(50)", "Scope": "g", "Opsi": "vendor", "WMI": "Manufacturer"},
            {"Type": "varchar(50)", "Scope": "i", "Opsi": "serialNumber", "WMI": "SerialNumber"}
        ]
    },
    {
        "Class": {"Type": "STRUCTURAL", "Opsi": "MEMORY_MODULE"},
        "Values": [
            {"Type": "bigint", "Scope": "g", "Opsi": "capacity"},
            {"Type": "varchar(20)", "Scope": "i", "Opsi": "deviceLocator"}
        ]
    }
]"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(AUDIT_CONFIG);
    let schema = HardwareSchema::from_file(file.path()).unwrap();

    assert_eq!(schema.classes().len(), 2);
    let board = schema.class("BASE_BOARD").unwrap();
    assert_eq!(board.attribute("vendor").unwrap().sql_type, "varchar(50)");
    assert_eq!(board.attribute("serialNumber").unwrap().scope, Scope::Host);
    assert_eq!(schema.matching_classes(&["MEMORY*"]), vec!["MEMORY_MODULE"]);
}

#[test]
fn test_missing_file_is_bad_value() {
    let dir = tempfile::tempdir().unwrap();
    let err = HardwareSchema::from_file(dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn test_malformed_file_is_bad_value() {
    let file = write_config("{\"Class\": ");
    let err = HardwareSchema::from_file(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn test_ddl_after_configuration_grows() {
    let file = write_config(AUDIT_CONFIG);
    let schema = HardwareSchema::from_file(file.path()).unwrap();

    // Tables as they were created from an older configuration.
    let mut existing = TableMap::new();
    existing.insert(
        "HARDWARE_DEVICE_BASE_BOARD".into(),
        vec!["hardware_id".into(), "name".into()],
    );
    existing.insert(
        "HARDWARE_CONFIG_BASE_BOARD".into(),
        vec!["config_id".into(), "hostId".into(), "serialNumber".into()],
    );

    let statements = schema.ddl_statements(&existing);
    assert_eq!(statements.len(), 4);
    assert_eq!(
        statements[0],
        "ALTER TABLE \"HARDWARE_DEVICE_BASE_BOARD\"\n\
         ALTER COLUMN \"name\" TYPE varchar(100),\n\
         ADD \"vendor\" varchar(50) NULL"
    );
    assert!(statements[2].starts_with("CREATE TABLE \"HARDWARE_DEVICE_MEMORY_MODULE\""));
    assert!(statements[3].contains("\"deviceLocator\" varchar(20) NULL"));
}
