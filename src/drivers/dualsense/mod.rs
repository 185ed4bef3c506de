pub mod driver;
pub mod hid_report;
pub mod hid_report_test;
