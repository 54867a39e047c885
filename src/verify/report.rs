//! Per-instance result of a numerical Jacobian test.

use std::fmt;

/// Outcome for one `(row, column)` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStatus {
    #[default]
    Untested,
    Pass,
    Fail,
    /// Untestable special case (an active `IC=` constraint, say)
    NotApplicable,
    /// Duplicate of an earlier local variable with the same global id
    Merged,
}

impl TestStatus {
    fn label(self) -> &'static str {
        match self {
            TestStatus::Untested => "",
            TestStatus::Pass => "",
            TestStatus::Fail => "fail",
            TestStatus::NotApplicable => "NA",
            TestStatus::Merged => "merged",
        }
    }
}

/// Which matrix a comparison belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    DfDx,
    DqDx,
}

impl MatrixKind {
    /// Line prefix used in the report table.
    pub fn prefix(self) -> &'static str {
        match self {
            MatrixKind::DfDx => "FT:",
            MatrixKind::DqDx => "QT:",
        }
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixKind::DfDx => f.write_str("dFdx"),
            MatrixKind::DqDx => f.write_str("dQdx"),
        }
    }
}

/// Analytic vs. numerical value of one Jacobian element.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianComparison {
    pub matrix: MatrixKind,
    /// Local row (reduced numbering)
    pub row: usize,
    /// Local column (reduced numbering)
    pub col: usize,
    pub row_name: String,
    pub col_name: String,
    pub numeric: f64,
    pub analytic: f64,
    pub abs_diff: f64,
    pub rel_error: f64,
    pub status: TestStatus,
}

/// Everything the verifier found for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianReport {
    pub instance: String,
    pub time: f64,
    pub newton_iter: usize,
    pub step_number: usize,
    pub entries: Vec<JacobianComparison>,
    /// Merged variables whose analytic rows or columns disagree
    pub merge_mismatch: bool,
}

impl JacobianReport {
    /// True when no element failed.
    pub fn passed(&self) -> bool {
        self.failures() == 0
    }

    /// Number of failing elements over both matrices.
    pub fn failures(&self) -> usize {
        self.count(TestStatus::Fail)
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Comparisons for one matrix.
    pub fn entries_for(&self, matrix: MatrixKind) -> impl Iterator<Item = &JacobianComparison> {
        self.entries.iter().filter(move |e| e.matrix == matrix)
    }

    /// Comparison for a local `(row, col)` element, if it was tested.
    pub fn find(&self, matrix: MatrixKind, row: usize, col: usize) -> Option<&JacobianComparison> {
        self.entries
            .iter()
            .find(|e| e.matrix == matrix && e.row == row && e.col == col)
    }
}

impl fmt::Display for JacobianReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for matrix in [MatrixKind::DfDx, MatrixKind::DqDx] {
            let failed = self
                .entries_for(matrix)
                .any(|e| e.status == TestStatus::Fail);
            writeln!(
                f,
                "{matrix} matrix for {}: JACOBIAN TEST {} at time = {:e} at Niter = {}",
                self.instance,
                if failed { "FAILURE" } else { "SUCCESS" },
                self.time,
                self.newton_iter,
            )?;
            writeln!(
                f,
                "     {:>12}  {:>12}  {:>12}  {:>12}",
                "numeric", "analytic", "absDiff", "relError"
            )?;
            for e in self.entries_for(matrix) {
                writeln!(
                    f,
                    "{}  {:12.4e}  {:12.4e}  {:12.4e}  {:12.4e}  {:>6}  {:>16}  {:>16}  ({},{})",
                    matrix.prefix(),
                    e.numeric,
                    e.analytic,
                    e.abs_diff,
                    e.rel_error,
                    e.status.label(),
                    e.row_name,
                    e.col_name,
                    e.row,
                    e.col,
                )?;
            }
        }
        if self.count(TestStatus::NotApplicable) > 0 {
            writeln!(f, " Note:  NA = untestable special case, such as IC=, etc.")?;
        }
        Ok(())
    }
}
