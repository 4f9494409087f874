use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::context::{PlatformVersion, SDK_KITKAT, SDK_LOLLIPOP};
use crate::shell::RootShell;

/// Oldest SDK level with a battery statistics service we know how to talk to
pub const SDK_ICE_CREAM_SANDWICH: u32 = 14;

const SDK_MARSHMALLOW: u32 = 23;

/// The platform's internal battery statistics service, which has been
/// published under different names over the years
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsInterface {
    /// `batteryinfo`, before KitKat
    BatteryInfo,
    /// `batterystats`, KitKat and later
    BatteryStats,
}

impl StatsInterface {
    /// Pick the interface for the platform, `None` if the platform predates
    /// all of them
    pub fn for_version(version: &PlatformVersion) -> Option<Self> {
        match version.sdk {
            sdk if sdk < SDK_ICE_CREAM_SANDWICH => None,
            sdk if sdk < SDK_KITKAT => Some(Self::BatteryInfo),
            _ => Some(Self::BatteryStats),
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            Self::BatteryInfo => "batteryinfo",
            Self::BatteryStats => "batterystats",
        }
    }
}

impl Display for StatsInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.service_name())
    }
}

/// `IBatteryStats.getStatistics` transaction code for the platform. Methods
/// shared with native code were added in front of it over time.
pub fn statistics_transaction(version: &PlatformVersion) -> u32 {
    match version.sdk {
        sdk if sdk < SDK_KITKAT => 1,
        sdk if sdk < SDK_LOLLIPOP => 3,
        sdk if sdk < SDK_MARSHMALLOW => 9,
        _ => 15,
    }
}

/// Source of the raw battery statistics blob
pub trait StatsProvider: Send + Sync {
    /// Fetch the current statistics. The bytes are handed back as the
    /// service produced them.
    fn get_statistics(&self) -> crate::Result<Vec<u8>>;
}

/// [StatsProvider] that calls the service's `getStatistics` through
/// `service call` in the root shell and decodes the byte array out of the
/// reply parcel.
///
/// The service is looked up on first use and the result is kept for the
/// life of the provider.
pub struct ServiceCallStats {
    shell: Arc<dyn RootShell>,
    version: PlatformVersion,
    timeout: Duration,
    transaction: u32,
    resolved: OnceCell<StatsInterface>,
}

impl ServiceCallStats {
    pub fn new(shell: Arc<dyn RootShell>, version: PlatformVersion, timeout: Duration) -> Self {
        Self {
            transaction: statistics_transaction(&version),
            shell,
            version,
            timeout,
            resolved: OnceCell::new(),
        }
    }

    pub fn with_transaction(mut self, transaction: u32) -> Self {
        self.transaction = transaction;
        self
    }

    /// Resolve (once) the service for this platform
    pub fn interface(&self) -> crate::Result<StatsInterface> {
        self.resolved
            .get_or_try_init(|| self.resolve())
            .map(|it| *it)
    }

    fn resolve(&self) -> crate::Result<StatsInterface> {
        let iface = StatsInterface::for_version(&self.version).ok_or_else(|| {
            crate::Error::ServiceUnavailable(format!(
                "no battery statistics interface for {}",
                self.version
            ))
        })?;

        let name = iface.service_name();
        let res = self
            .shell
            .run(&format!("service check {}", name), self.timeout)?;
        let out = res.output_string();
        if !res.ok() || out.contains("not found") {
            return Err(crate::Error::ServiceUnavailable(format!(
                "service {} isn't published: {}",
                name,
                out.trim()
            )));
        }

        log::info!(
            "using battery statistics service {} (transaction {})",
            name,
            self.transaction
        );
        Ok(iface)
    }
}

impl StatsProvider for ServiceCallStats {
    fn get_statistics(&self) -> crate::Result<Vec<u8>> {
        let iface = self.interface()?;
        let command = format!("service call {} {}", iface, self.transaction);
        let res = self.shell.run(&command, self.timeout)?;
        if !res.ok() {
            return Err(crate::Error::ServiceUnavailable(format!(
                "{} exited with {}: {}",
                command,
                res.exit,
                res.output_string().trim()
            )));
        }
        let words = parse_parcel_reply(&res.output_string())?;
        read_byte_array_reply(&words)
    }
}

fn unavailable<S: Into<String>>(msg: S) -> crate::Error {
    crate::Error::ServiceUnavailable(msg.into())
}

/// Pull the 32 bit words out of the hex dump `service call` prints:
///
/// ```text
/// Result: Parcel(
///   0x00000000: 00000000 00000006 64636261 00006665 '........abcdef..')
/// ```
///
/// Short replies are printed on the `Result:` line itself.
pub fn parse_parcel_reply(dump: &str) -> crate::Result<Vec<u32>> {
    const START: &str = "Parcel(";

    let start = dump
        .find(START)
        .ok_or_else(|| unavailable(format!("no parcel in reply: {}", dump.trim())))?;
    let body = &dump[start + START.len()..];
    if body.trim_start().starts_with("Error") {
        return Err(unavailable(format!("transaction failed: {}", body.trim())));
    }

    let mut words = Vec::new();
    for line in body.lines() {
        let hex = match line.find('\'') {
            Some(idx) => &line[..idx],
            None => line,
        };
        for tok in hex.split_ascii_whitespace() {
            if tok.ends_with(':') {
                continue;
            }
            let word = (tok.len() == 8)
                .then(|| u32::from_str_radix(tok, 16).ok())
                .flatten()
                .ok_or_else(|| unavailable(format!("malformed parcel word {:?}", tok)))?;
            words.push(word);
        }
    }
    Ok(words)
}

/// Decode a reply holding a `byte[]`: the exception code, the array length
/// and then the data padded to a multiple of 4 bytes
pub fn read_byte_array_reply(words: &[u32]) -> crate::Result<Vec<u8>> {
    let (status, rest) = words
        .split_first()
        .ok_or_else(|| unavailable("empty reply parcel"))?;
    if *status != 0 {
        return Err(unavailable(format!(
            "service threw exception {}",
            *status as i32
        )));
    }

    let (len, data) = rest
        .split_first()
        .ok_or_else(|| unavailable("reply parcel has no array"))?;
    let len = usize::try_from(*len as i32).map_err(|_| unavailable("service returned null"))?;

    let mut bytes: Vec<u8> = data.iter().flat_map(|it| it.to_le_bytes()).collect();
    if bytes.len() < len {
        return Err(unavailable(format!(
            "reply parcel truncated, {} of {} bytes",
            bytes.len(),
            len
        )));
    }
    bytes.truncate(len);
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{result_with, MockRootShell};
    use rstest::*;

    #[rstest]
    #[case(10, None)]
    #[case(13, None)]
    #[case(14, Some(StatsInterface::BatteryInfo))]
    #[case(18, Some(StatsInterface::BatteryInfo))]
    #[case(19, Some(StatsInterface::BatteryStats))]
    #[case(34, Some(StatsInterface::BatteryStats))]
    fn test_for_version(#[case] sdk: u32, #[case] expected: Option<StatsInterface>) {
        assert_eq!(
            StatsInterface::for_version(&PlatformVersion::new(sdk, "x")),
            expected
        );
    }

    #[test]
    fn test_service_names() {
        assert_eq!(StatsInterface::BatteryInfo.service_name(), "batteryinfo");
        assert_eq!(StatsInterface::BatteryStats.to_string(), "batterystats");
    }

    #[rstest]
    #[case(16, 1)]
    #[case(19, 3)]
    #[case(22, 9)]
    #[case(23, 15)]
    #[case(30, 15)]
    fn test_statistics_transaction(#[case] sdk: u32, #[case] expected: u32) {
        assert_eq!(
            statistics_transaction(&PlatformVersion::new(sdk, "x")),
            expected
        );
    }

    const REPLY: &[&str] = &[
        "Result: Parcel(",
        "  0x00000000: 00000000 00000006 64636261 00006665 '........abcdef..')",
    ];

    #[test]
    fn test_parse_parcel_reply() {
        let words = parse_parcel_reply(&REPLY.join("\n")).unwrap();
        assert_eq!(words, vec![0, 6, 0x64636261, 0x6665]);
        assert_eq!(read_byte_array_reply(&words).unwrap(), b"abcdef".to_vec());

        let words = parse_parcel_reply("Result: Parcel(00000000 00000000   '........')").unwrap();
        assert_eq!(read_byte_array_reply(&words).unwrap(), Vec::<u8>::new());
    }

    #[rstest]
    #[case("Result: Parcel(Error: 0xffffffb6 \"Not a data message\")")]
    #[case("service: Service batterystats does not exist")]
    #[case("Result: Parcel(0000 '..')")]
    fn test_parse_parcel_reply_invalid(#[case] dump: &str) {
        assert!(matches!(
            parse_parcel_reply(dump),
            Err(crate::Error::ServiceUnavailable(_))
        ));
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0xffffffff])]
    #[case(&[0])]
    #[case(&[0, 0xffffffff])]
    #[case(&[0, 9, 0x64636261])]
    fn test_read_byte_array_reply_invalid(#[case] words: &[u32]) {
        assert!(matches!(
            read_byte_array_reply(words),
            Err(crate::Error::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_resolved_once() {
        let mut shell = MockRootShell::new();
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service check batterystats")
            .times(1)
            .returning(|_, _| Ok(result_with(0, &["Service batterystats: found"])));
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service call batterystats 15")
            .times(2)
            .returning(|_, _| Ok(result_with(0, REPLY)));

        let stats = ServiceCallStats::new(
            Arc::new(shell),
            PlatformVersion::new(30, "11"),
            Duration::from_secs(1),
        );
        assert_eq!(stats.get_statistics().unwrap(), b"abcdef".to_vec());
        assert!(stats.get_statistics().is_ok());
    }

    #[test]
    fn test_transaction_override() {
        let mut shell = MockRootShell::new();
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service check batteryinfo")
            .returning(|_, _| Ok(result_with(0, &["Service batteryinfo: found"])));
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service call batteryinfo 4")
            .times(1)
            .returning(|_, _| Ok(result_with(0, REPLY)));

        let stats = ServiceCallStats::new(
            Arc::new(shell),
            PlatformVersion::new(16, "4.1"),
            Duration::from_secs(1),
        )
        .with_transaction(4);
        assert_eq!(stats.get_statistics().unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn test_call_failure_unavailable() {
        let mut shell = MockRootShell::new();
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service check batterystats")
            .returning(|_, _| Ok(result_with(0, &["Service batterystats: found"])));
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command.starts_with("service call"))
            .returning(|_, _| {
                Ok(result_with(
                    0,
                    &["Result: Parcel(ffffffff 00000000 '........')"],
                ))
            });

        let stats = ServiceCallStats::new(
            Arc::new(shell),
            PlatformVersion::new(30, "11"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            stats.get_statistics(),
            Err(crate::Error::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_old_platform_unavailable() {
        let stats = ServiceCallStats::new(
            Arc::new(MockRootShell::new()),
            PlatformVersion::new(10, "2.3.3"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            stats.get_statistics(),
            Err(crate::Error::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_service_not_found() {
        let mut shell = MockRootShell::new();
        shell
            .expect_execute_cancelable()
            .withf(|cmd, _| cmd.command == "service check batteryinfo")
            .returning(|_, _| Ok(result_with(0, &["Service batteryinfo: not found"])));

        let stats = ServiceCallStats::new(
            Arc::new(shell),
            PlatformVersion::new(16, "4.1"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            stats.interface(),
            Err(crate::Error::ServiceUnavailable(_))
        ));
    }
}
