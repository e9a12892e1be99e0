pub type Endpoint = str;

pub const LOGIN: &Endpoint = "/account/token";
pub const STATIONS: &Endpoint = "/station/list";
pub const STATION_LATEST: &Endpoint = "/station/latest";
pub const DEVICES: &Endpoint = "/station/device";
pub const DEVICE_LATEST: &Endpoint = "/device/latest";

pub const CHARGE_MODE: &Endpoint = "/order/battery/modeControl";
pub const SOLAR_SELL: &Endpoint = "/order/sys/solarSell/control";
pub const WORK_MODE: &Endpoint = "/order/sys/workMode/update";
pub const ENERGY_PATTERN: &Endpoint = "/order/sys/energyPattern/update";
pub const SYSTEM_POWER: &Endpoint = "/order/sys/power/update";
pub const BATTERY_PARAMETER: &Endpoint = "/order/battery/parameter/update";
