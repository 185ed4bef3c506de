/// USB identity of a genuine DualShock 3. The console only trusts
/// home-button input from this VID/PID, so the gadget side of the bridge
/// must announce exactly these values (they are configured in the ConfigFS
/// gadget by the provisioning scripts; the daemon asserts them in logs).
pub const SONY_VID: u16 = 0x054C;
pub const DS3_PID: u16 = 0x0268;

pub const MANUFACTURER: &str = "Sony";
pub const PRODUCT: &str = "PLAYSTATION(R)3 Controller";
pub const SERIAL: &str = "123456";

/// Default FunctionFS mount the wired transport binds to. The ConfigFS
/// gadget and the mount itself are provisioned externally.
pub const DEFAULT_FFS_DIR: &str = "/dev/ffs-rosettapad";

/// Well-known path of the lightbar override IPC file.
pub const LIGHTBAR_IPC_PATH: &str = "/tmp/rosettapad_lightbar.json";

/// XDG prefix used for the config file and the pairing record.
pub const XDG_PREFIX: &str = "rosettapad";

/// L2CAP protocol/service multiplexers of the HID profile.
pub const PSM_HID_CONTROL: u16 = 0x0011;
pub const PSM_HID_INTERRUPT: u16 = 0x0013;
