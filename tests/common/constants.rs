pub const ACME_URL: &str = "https://x.test/job/1";
pub const ACME: &str = "Acme";
pub const POSITION: &str = "Engineer";
pub const APPLIED_ON: &str = "2024-01-15";

pub const COMPANIES: [&str; 4] = ["Acme", "Globex", "Initech", "Umbrella"];
