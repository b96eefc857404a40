use std::io::Write;

pub const CLUSTER_LOG_HEADER: &str = "epoch,acc,nmi,ari,loss";

/// One evaluation point of a training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterRecord {
    pub epoch: usize,
    /// `NaN` without labels
    pub accuracy: f64,
    pub nmi: f64,
    pub ari: f64,
    pub loss: f64,
}

impl ClusterRecord {
    /// `epoch,acc,nmi,ari,loss` with five decimals
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{:.5},{:.5},{:.5},{:.5}",
            self.epoch, self.accuracy, self.nmi, self.ari, self.loss
        )
    }
}

impl std::fmt::Display for ClusterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] acc = {:.5}, nmi = {:.5}, ari = {:.5}, loss = {:.5}",
            self.epoch, self.accuracy, self.nmi, self.ari, self.loss
        )
    }
}

/// Append-only destination of evaluation records
pub trait ClusterLogSink {
    fn append(&mut self, record: &ClusterRecord) -> anyhow::Result<()>;
}

impl ClusterLogSink for Vec<ClusterRecord> {
    fn append(&mut self, record: &ClusterRecord) -> anyhow::Result<()> {
        self.push(*record);
        Ok(())
    }
}

/// CSV file sink; the header goes out on creation and every record is
/// flushed right away
pub struct CsvClusterLog {
    writer: Box<dyn Write>,
}

impl CsvClusterLog {
    pub fn create(file: &str) -> anyhow::Result<Self> {
        let mut writer = matrix_util::common_io::open_buf_writer(file)?;
        writeln!(writer, "{}", CLUSTER_LOG_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }
}

impl ClusterLogSink for CsvClusterLog {
    fn append(&mut self, record: &ClusterRecord) -> anyhow::Result<()> {
        writeln!(self.writer, "{}", record.to_csv_line())?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_line_rounds_and_keeps_nan() {
        let rec = ClusterRecord {
            epoch: 10,
            accuracy: 0.123456789,
            nmi: f64::NAN,
            ari: 1.0,
            loss: 12.3456749,
        };
        assert_eq!(rec.to_csv_line(), "10,0.12346,NaN,1.00000,12.34567");
    }

    #[test]
    fn csv_file_has_header_then_rows() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("run.cluster_log.csv");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
        {
            let mut log = CsvClusterLog::create(file)?;
            for epoch in [0, 5] {
                log.append(&ClusterRecord {
                    epoch,
                    accuracy: 0.5,
                    nmi: 0.25,
                    ari: 0.125,
                    loss: 3.0,
                })?;
            }
        }
        let content = std::fs::read_to_string(file)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CLUSTER_LOG_HEADER);
        assert_eq!(lines[2], "5,0.50000,0.25000,0.12500,3.00000");
        assert_eq!(lines.len(), 3);
        Ok(())
    }
}
