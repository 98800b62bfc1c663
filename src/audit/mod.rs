//! Audits over built toolchains: ABI, hardening and file permissions.

pub mod abi;
pub mod checksec;
pub mod permissions;

use time::OffsetDateTime;

/// `YYYY_MM_DD_HH_MM_SS`, used in permission log names.
pub(crate) fn log_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}_{:02}_{:02}_{:02}_{:02}_{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// `YYYY/MM/DD HH:MM:SS`, used in report summaries.
pub(crate) fn report_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}/{:02}/{:02} {:02}:{:02}:{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shapes() {
        let log = log_timestamp();
        assert_eq!(log.len(), 19);
        assert_eq!(log.matches('_').count(), 5);

        let report = report_timestamp();
        assert_eq!(report.len(), 19);
        assert_eq!(&report[4..5], "/");
        assert_eq!(&report[10..11], " ");
    }
}
