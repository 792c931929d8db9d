//! In-memory device used by provisioning and sync tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::row::{Row, device_key, normalize_row, to_device_row};
use super::{AddReport, RouterTransport, TransportError};

#[derive(Default)]
struct FakeState {
    menus: HashMap<String, Vec<Row>>,
    commands: Vec<(String, Row)>,
    rejected_commands: HashSet<String>,
    rejected_adds: Vec<(String, String, String)>,
    offline: bool,
    next_id: u64,
}

/// A scriptable device. Rows are stored in device (hyphenated) form, exactly
/// as a real router would hold them.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn reject_command(&self, command: &str) {
        self.lock().rejected_commands.insert(command.to_string());
    }

    /// Makes adds to `menu` fail for rows whose `field` equals `value`, the
    /// way a device refuses a duplicate name or a malformed attribute.
    pub fn reject_add(&self, menu: &str, field: &str, value: &str) {
        self.lock().rejected_adds.push((
            menu.to_string(),
            device_key(field),
            value.to_string(),
        ));
    }

    pub fn seed(&self, menu: &str, rows: Vec<Row>) {
        let mut state = self.lock();
        for row in rows {
            let mut row = to_device_row(&row);
            state.next_id += 1;
            let id = format!("*{}", state.next_id);
            row.entry(".id".to_string()).or_insert(id);
            state.menus.entry(menu.to_string()).or_default().push(row);
        }
    }

    /// Raw device-form rows currently in a menu.
    pub fn rows(&self, menu: &str) -> Vec<Row> {
        self.lock().menus.get(menu).cloned().unwrap_or_default()
    }

    /// Commands executed so far, in order.
    pub fn executed(&self) -> Vec<(String, Row)> {
        self.lock().commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.lock().offline {
            Err(TransportError::Connection {
                host: "fake".to_string(),
                port: 0,
                reason: "device offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn matches(row: &Row, filter: &Row) -> bool {
    filter
        .iter()
        .all(|(key, value)| row.get(&device_key(key)) == Some(value))
}

#[async_trait]
impl RouterTransport for FakeTransport {
    async fn check_connectivity(&self) -> Result<(), TransportError> {
        self.ensure_online()
    }

    async fn get_rows(&self, menu: &str, filter: &Row) -> Result<Vec<Row>, TransportError> {
        self.ensure_online()?;
        let state = self.lock();
        Ok(state
            .menus
            .get(menu)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(row, filter))
                    .map(|row| normalize_row(row.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_rows(&self, menu: &str, rows: &[Row]) -> Result<AddReport, TransportError> {
        self.ensure_online()?;
        let mut state = self.lock();
        let mut report = AddReport::default();
        for row in rows {
            let mut row = to_device_row(row);
            if let Some((_, field, value)) = state
                .rejected_adds
                .iter()
                .find(|(m, field, value)| m == menu && row.get(field) == Some(value))
            {
                report.record_error(format!("{menu}: failure: {field}={value} rejected"));
                continue;
            }
            state.next_id += 1;
            let id = format!("*{}", state.next_id);
            row.insert(".id".to_string(), id);
            state.menus.entry(menu.to_string()).or_default().push(row);
            report.created += 1;
        }
        Ok(report)
    }

    async fn edit_row(
        &self,
        menu: &str,
        current: &Row,
        changes: &Row,
    ) -> Result<bool, TransportError> {
        self.ensure_online()?;
        let Some(id) = current.get(".id") else {
            return Ok(false);
        };
        let mut state = self.lock();
        let Some(rows) = state.menus.get_mut(menu) else {
            return Ok(false);
        };
        let Some(row) = rows.iter_mut().find(|r| r.get(".id") == Some(id)) else {
            return Ok(false);
        };
        for (key, value) in to_device_row(changes) {
            row.insert(key, value);
        }
        Ok(true)
    }

    async fn remove_rows(&self, menu: &str, filter: &Row) -> Result<u64, TransportError> {
        self.ensure_online()?;
        let mut state = self.lock();
        let Some(rows) = state.menus.get_mut(menu) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !matches(row, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn exec_command(
        &self,
        command: &str,
        args: &Row,
    ) -> Result<Option<Vec<Row>>, TransportError> {
        self.ensure_online()?;
        let mut state = self.lock();
        state.commands.push((command.to_string(), args.clone()));
        if state.rejected_commands.contains(command) {
            Ok(None)
        } else {
            Ok(Some(Vec::new()))
        }
    }
}
