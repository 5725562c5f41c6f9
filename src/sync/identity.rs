use tracing::debug;

use crate::error::HostResult;
use crate::host::{EmployeeDirectory, EmployeeField};

/// Ordered lookup strategies; the first one that finds an employee wins.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    strategies: Vec<EmployeeField>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(vec![
            EmployeeField::EmployeeNumber,
            EmployeeField::LinkedUserId,
            EmployeeField::AttendanceDeviceId,
        ])
    }
}

impl IdentityResolver {
    pub fn new(strategies: Vec<EmployeeField>) -> Self {
        Self { strategies }
    }

    /// Host employee id for a device code, `None` when every strategy misses.
    /// Optional fields missing from the host schema are skipped.
    pub async fn resolve<D: EmployeeDirectory>(
        &self,
        directory: &D,
        emp_code: &str,
    ) -> HostResult<Option<String>> {
        for &field in &self.strategies {
            if field.is_optional() && !directory.has_field(field).await? {
                continue;
            }
            if let Some(employee) = directory.lookup(field, emp_code).await? {
                debug!(emp_code, employee = %employee, field = field.fieldname(), "Resolved employee");
                return Ok(Some(employee));
            }
        }
        Ok(None)
    }
}
