//! Windows backends: CIM through PowerShell, the TCP/IP registry, `netsh`,
//! IP Helper and the service control manager.

use crate::adapter::{AdapterId, IpFamily, NetworkAdapter};
use crate::directory::{AdapterSource, InventoryEntry};
use crate::dns::{DnsCache, DnsStrategy};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::platform::CREATE_NO_WINDOW;
use crate::ports::TcpTable;
use crate::process::SystemProcesses;
use crate::service::{RunState, ServiceFault, ServiceManager, ServiceSpec, StartType};
use crate::util::to_wide;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::os::windows::process::CommandExt;
use std::process::Stdio;
use std::sync::Arc;
use winreg::RegKey;
use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ, KEY_SET_VALUE};

const TCPIP_INTERFACES: &str = r"SYSTEM\CurrentControlSet\Services\Tcpip\Parameters\Interfaces";
const TCPIP6_INTERFACES: &str = r"SYSTEM\CurrentControlSet\Services\Tcpip6\Parameters\Interfaces";

const AF_INET: u32 = 2;
const AF_INET6: u32 = 23;
const ERROR_BUFFER_OVERFLOW: u32 = 111;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;

/// The live Windows backend set.
#[must_use]
pub fn host() -> Host {
    Host {
        adapters: Arc::new(CimAdapterSource),
        ipv4_dns: vec![
            Arc::new(CimIpv4Dns),
            Arc::new(RegistryDns::new(IpFamily::V4)),
        ],
        ipv6_dns: vec![
            Arc::new(NetshIpv6Dns),
            Arc::new(RegistryDns::new(IpFamily::V6)),
        ],
        dns_cache: Arc::new(IpconfigCache),
        tcp_table: Arc::new(IpHelperTcpTable),
        processes: Arc::new(SystemProcesses::new()),
        services: Arc::new(ScManager),
        hit_log: Host::noop_tracker(),
    }
}

fn interfaces_key(family: IpFamily) -> &'static str {
    match family {
        IpFamily::V4 => TCPIP_INTERFACES,
        IpFamily::V6 => TCPIP6_INTERFACES,
    }
}

// ---------------------------------------------------------------------------
// PowerShell
// ---------------------------------------------------------------------------

fn powershell_command(script: &str) -> std::process::Command {
    let mut command = std::process::Command::new("powershell");
    command
        .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", script])
        .stdin(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW);
    command
}

fn run_powershell(script: &str) -> Result<String> {
    let output = powershell_command(script).output()?;
    if !output.status.success() {
        return Err(Error::Command {
            command: "powershell".into(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Quotes `value` as a PowerShell single-quoted literal.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ---------------------------------------------------------------------------
// Adapter inventory
// ---------------------------------------------------------------------------

const INVENTORY_SCRIPT: &str = r"
$ErrorActionPreference = 'Stop'
$configs = @{}
Get-CimInstance Win32_NetworkAdapterConfiguration | ForEach-Object { $configs[[int]$_.InterfaceIndex] = $_ }
$rows = @(Get-CimInstance Win32_NetworkAdapter | ForEach-Object {
    $cfg = $configs[[int]$_.InterfaceIndex]
    [pscustomobject]@{
        Name = $_.Name
        NetConnectionID = $_.NetConnectionID
        Description = $_.Description
        InterfaceIndex = $_.InterfaceIndex
        GUID = $_.GUID
        NetEnabled = $_.NetEnabled
        NetConnectionStatus = $_.NetConnectionStatus
        PhysicalAdapter = $_.PhysicalAdapter
        HasConfiguration = [bool]$cfg
        DNSServerSearchOrder = if ($cfg -and $cfg.DNSServerSearchOrder) { @($cfg.DNSServerSearchOrder) } else { @() }
    }
})
ConvertTo-Json -InputObject $rows -Depth 3 -Compress
";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimAdapter {
    name: Option<String>,
    #[serde(rename = "NetConnectionID")]
    net_connection_id: Option<String>,
    description: Option<String>,
    interface_index: u32,
    #[serde(rename = "GUID")]
    guid: Option<String>,
    net_enabled: Option<bool>,
    net_connection_status: Option<u16>,
    physical_adapter: Option<bool>,
    #[serde(default)]
    has_configuration: bool,
    #[serde(rename = "DNSServerSearchOrder")]
    dns_server_search_order: Option<OneOrMany>,
}

impl From<CimAdapter> for InventoryEntry {
    fn from(row: CimAdapter) -> Self {
        let ipv4_dns = row
            .has_configuration
            .then(|| row.dns_server_search_order.map(OneOrMany::into_vec).unwrap_or_default());
        Self {
            name: row.name.unwrap_or_default(),
            friendly_name: row.net_connection_id.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            interface_index: row.interface_index,
            guid: row.guid.unwrap_or_default(),
            enabled: row.net_enabled.unwrap_or(false),
            connection_status: row.net_connection_status.unwrap_or(0),
            physical: row.physical_adapter.unwrap_or(false),
            ipv4_dns,
        }
    }
}

fn parse_inventory(json: &str) -> Result<Vec<InventoryEntry>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<CimAdapter> = serde_json::from_str(json)?;
    Ok(rows.into_iter().map(InventoryEntry::from).collect())
}

/// [`AdapterSource`] over CIM, IP Helper and the TCP/IP registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CimAdapterSource;

impl AdapterSource for CimAdapterSource {
    fn inventory(&self) -> Result<Vec<InventoryEntry>> {
        parse_inventory(&run_powershell(INVENTORY_SCRIPT)?)
    }

    fn ipv6_dns(&self) -> Result<HashMap<AdapterId, Vec<String>>> {
        adapters_ipv6_dns()
    }

    fn dns_auto(&self, family: IpFamily) -> Result<HashMap<AdapterId, bool>> {
        let root = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey_with_flags(interfaces_key(family), KEY_READ)?;
        let mut flags = HashMap::new();
        for name in root.enum_keys() {
            let name = name?;
            let Ok(id) = name.parse::<AdapterId>() else {
                continue;
            };
            let servers = root
                .open_subkey_with_flags(&name, KEY_READ)
                .and_then(|key| key.get_value::<String, _>("NameServer"))
                .unwrap_or_default();
            flags.insert(id, servers.trim().is_empty());
        }
        Ok(flags)
    }

    fn best_interface_index(&self) -> Result<u32> {
        use windows_sys::Win32::NetworkManagement::IpHelper::GetBestInterface;

        let mut index = 0u32;
        // SAFETY: `index` is a valid out pointer for the duration of the call.
        let code = unsafe { GetBestInterface(0, &mut index) };
        if code == 0 {
            Ok(index)
        } else {
            Err(os_error(code))
        }
    }
}

fn adapters_ipv6_dns() -> Result<HashMap<AdapterId, Vec<String>>> {
    use windows_sys::Win32::NetworkManagement::IpHelper::{GetAdaptersAddresses, IP_ADAPTER_ADDRESSES_LH};
    use windows_sys::Win32::Networking::WinSock::SOCKADDR_IN6;

    const GAA_FLAG_SKIP_UNICAST: u32 = 0x0001;
    const GAA_FLAG_SKIP_ANYCAST: u32 = 0x0002;
    const GAA_FLAG_SKIP_MULTICAST: u32 = 0x0004;
    let flags = GAA_FLAG_SKIP_UNICAST | GAA_FLAG_SKIP_ANYCAST | GAA_FLAG_SKIP_MULTICAST;

    // u64 backing keeps the buffer aligned for the structs written into it.
    let mut size: u32 = 16 * 1024;
    let mut buffer: Vec<u64>;
    loop {
        buffer = vec![0u64; (size as usize).div_ceil(8)];
        // SAFETY: `buffer` holds at least `size` bytes and `size` is a valid
        // in/out pointer.
        let code = unsafe {
            GetAdaptersAddresses(
                AF_INET6,
                flags,
                std::ptr::null(),
                buffer.as_mut_ptr().cast::<IP_ADAPTER_ADDRESSES_LH>(),
                &mut size,
            )
        };
        match code {
            0 => break,
            ERROR_BUFFER_OVERFLOW => {}
            other => return Err(os_error(other)),
        }
    }

    let mut servers = HashMap::new();
    let mut current = buffer.as_ptr().cast::<IP_ADAPTER_ADDRESSES_LH>();
    // SAFETY: the buffer was filled by GetAdaptersAddresses, which links
    // adapters and DNS entries into it; every pointer followed below points
    // into that buffer or is null.
    unsafe {
        while !current.is_null() {
            let adapter = &*current;
            let name = std::ffi::CStr::from_ptr(adapter.AdapterName.cast_const().cast::<std::ffi::c_char>())
                .to_string_lossy()
                .into_owned();
            let mut list = Vec::new();
            let mut dns = adapter.FirstDnsServerAddress;
            while !dns.is_null() {
                let sockaddr = (*dns).Address.lpSockaddr;
                if !sockaddr.is_null() && u32::from((*sockaddr).sa_family) == AF_INET6 {
                    let sin6 = &*sockaddr.cast::<SOCKADDR_IN6>();
                    list.push(Ipv6Addr::from(sin6.sin6_addr.u.Byte).to_string());
                }
                dns = (*dns).Next;
            }
            if let Ok(id) = name.parse::<AdapterId>() {
                servers.insert(id, list);
            }
            current = adapter.Next;
        }
    }
    Ok(servers)
}

// ---------------------------------------------------------------------------
// DNS writers
// ---------------------------------------------------------------------------

/// IPv4 DNS through `Win32_NetworkAdapterConfiguration.SetDNSServerSearchOrder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CimIpv4Dns;

impl CimIpv4Dns {
    fn script(interface_index: u32, servers: &[String]) -> String {
        let list = if servers.is_empty() {
            "$null".to_string()
        } else {
            let quoted: Vec<String> = servers.iter().map(|s| ps_quote(s)).collect();
            format!("[string[]]@({})", quoted.join(","))
        };
        format!(
            "$cfg = Get-CimInstance Win32_NetworkAdapterConfiguration -Filter 'InterfaceIndex = {interface_index}'\n\
             if (-not $cfg) {{ exit 100 }}\n\
             $r = Invoke-CimMethod -InputObject $cfg -MethodName SetDNSServerSearchOrder -Arguments @{{ DNSServerSearchOrder = {list} }}\n\
             exit [int]$r.ReturnValue"
        )
    }
}

impl DnsStrategy for CimIpv4Dns {
    fn name(&self) -> &'static str {
        "cim"
    }

    fn apply<'a>(&'a self, adapter: &'a NetworkAdapter, servers: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let script = Self::script(adapter.interface_index, servers);
            let status = tokio::process::Command::from(powershell_command(&script))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await?;
            // 0 = success, 1 = success, reboot required.
            match status.code() {
                Some(0 | 1) => Ok(()),
                code => Err(Error::Command {
                    command: "SetDNSServerSearchOrder".into(),
                    stderr: format!("return value {code:?}"),
                }),
            }
        })
    }
}

/// IPv6 DNS through `netsh interface ipv6`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetshIpv6Dns;

async fn netsh(args: &[&str], name: &str) -> Result<()> {
    let mut command = tokio::process::Command::new("netsh");
    command.args(["interface", "ipv6"]).args(args.iter().take(2));
    command.raw_arg(format!("name=\"{name}\""));
    command
        .args(args.iter().skip(2))
        .stdin(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW);
    let output = command.output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::Command {
            command: format!("netsh interface ipv6 {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        })
    }
}

impl DnsStrategy for NetshIpv6Dns {
    fn name(&self) -> &'static str {
        "netsh"
    }

    fn apply<'a>(&'a self, adapter: &'a NetworkAdapter, servers: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let name = adapter.friendly_name.as_str();
            let Some((primary, secondary)) = servers.split_first() else {
                return netsh(&["set", "dnsservers", "source=dhcp"], name).await;
            };

            netsh(&["set", "dnsservers", "static", primary, "primary", "validate=no"], name).await?;
            for (offset, server) in secondary.iter().enumerate() {
                let index = format!("index={}", offset + 2);
                let address = format!("address={server}");
                if let Err(e) = netsh(&["add", "dnsservers", &address, &index, "validate=no"], name).await {
                    tracing::warn!(adapter = %name, server = %server, error = %e, "Failed to add secondary IPv6 DNS server");
                }
            }
            Ok(())
        })
    }
}

/// Direct write of the `NameServer` registry value.
#[derive(Debug, Clone, Copy)]
pub struct RegistryDns {
    family: IpFamily,
}

impl RegistryDns {
    /// Writes under `Tcpip` for IPv4 and `Tcpip6` for IPv6.
    #[must_use]
    pub const fn new(family: IpFamily) -> Self {
        Self { family }
    }
}

impl DnsStrategy for RegistryDns {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn apply<'a>(&'a self, adapter: &'a NetworkAdapter, servers: &'a [String]) -> BoxFuture<'a, Result<()>> {
        let path = format!("{}\\{}", interfaces_key(self.family), adapter.id);
        let value = servers.join(",");
        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> Result<()> {
                let key = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey_with_flags(&path, KEY_SET_VALUE)?;
                key.set_value("NameServer", &value)?;
                Ok(())
            })
            .await?
        })
    }
}

/// `ipconfig /flushdns`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpconfigCache;

impl DnsCache for IpconfigCache {
    fn flush(&self) -> Result<()> {
        let output = std::process::Command::new("ipconfig")
            .arg("/flushdns")
            .stdin(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Command {
                command: "ipconfig /flushdns".into(),
                stderr: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// TCP owner table
// ---------------------------------------------------------------------------

/// [`TcpTable`] over `GetExtendedTcpTable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpHelperTcpTable;

fn extended_tcp_table(family: u32) -> Result<Vec<u64>> {
    use windows_sys::Win32::NetworkManagement::IpHelper::{GetExtendedTcpTable, TCP_TABLE_OWNER_PID_ALL};

    let mut size: u32 = 16 * 1024;
    loop {
        let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
        // SAFETY: `buffer` holds at least `size` bytes and `size` is a valid
        // in/out pointer.
        let code = unsafe {
            GetExtendedTcpTable(
                buffer.as_mut_ptr().cast(),
                &mut size,
                0,
                family,
                TCP_TABLE_OWNER_PID_ALL,
                0,
            )
        };
        match code {
            0 => return Ok(buffer),
            ERROR_INSUFFICIENT_BUFFER => {}
            other => return Err(os_error(other)),
        }
    }
}

fn row_port(raw: u32) -> u16 {
    u16::from_be(u16::try_from(raw & 0xFFFF).unwrap_or(0))
}

impl TcpTable for IpHelperTcpTable {
    fn owner_pid(&self, port: u16, family: IpFamily) -> Result<u32> {
        use windows_sys::Win32::NetworkManagement::IpHelper::{MIB_TCP6ROW_OWNER_PID, MIB_TCPROW_OWNER_PID};

        let af = match family {
            IpFamily::V4 => AF_INET,
            IpFamily::V6 => AF_INET6,
        };
        let buffer = extended_tcp_table(af)?;
        let base = buffer.as_ptr().cast::<u8>();
        // SAFETY: the table starts with a `u32` row count followed by that
        // many rows, all inside `buffer`. Rows start at offset 4, which
        // satisfies the `u32` alignment of both row types.
        unsafe {
            let count = base.cast::<u32>().read() as usize;
            let rows = base.add(4);
            match family {
                IpFamily::V4 => {
                    let rows = std::slice::from_raw_parts(rows.cast::<MIB_TCPROW_OWNER_PID>(), count);
                    Ok(rows
                        .iter()
                        .find(|row| row_port(row.dwLocalPort) == port)
                        .map_or(0, |row| row.dwOwningPid))
                }
                IpFamily::V6 => {
                    let rows = std::slice::from_raw_parts(rows.cast::<MIB_TCP6ROW_OWNER_PID>(), count);
                    Ok(rows
                        .iter()
                        .find(|row| row_port(row.dwLocalPort) == port)
                        .map_or(0, |row| row.dwOwningPid))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Service control manager
// ---------------------------------------------------------------------------

const SC_MANAGER_ALL_ACCESS: u32 = 0x000F_003F;
const SERVICE_ALL_ACCESS: u32 = 0x000F_01FF;
const SERVICE_QUERY_STATUS: u32 = 0x0004;
const SERVICE_CHANGE_CONFIG: u32 = 0x0002;
const SERVICE_START: u32 = 0x0010;
const SERVICE_STOP: u32 = 0x0020;
const DELETE: u32 = 0x0001_0000;
const SERVICE_WIN32_OWN_PROCESS: u32 = 0x0010;
const SERVICE_ERROR_NORMAL: u32 = 0x0001;
const SERVICE_NO_CHANGE: u32 = 0xFFFF_FFFF;
const SERVICE_CONTROL_STOP: u32 = 0x0001;
const SERVICE_AUTO_START: u32 = 0x0002;
const SERVICE_DEMAND_START: u32 = 0x0003;
const SERVICE_DISABLED: u32 = 0x0004;
const SERVICE_STOPPED: u32 = 0x0001;
const SERVICE_RUNNING: u32 = 0x0004;
const SERVICE_PAUSED: u32 = 0x0007;

/// [`ServiceManager`] over the Win32 service API.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScManager;

struct ScHandle(windows_sys::Win32::System::Services::SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned non-null by the SCM and is closed
        // exactly once.
        unsafe {
            windows_sys::Win32::System::Services::CloseServiceHandle(self.0);
        }
    }
}

fn last_error() -> u32 {
    // SAFETY: reads the calling thread's last-error value.
    unsafe { windows_sys::Win32::Foundation::GetLastError() }
}

fn last_fault() -> ServiceFault {
    ServiceFault::from_code(last_error())
}

const fn start_type_code(start: StartType) -> u32 {
    match start {
        StartType::Automatic => SERVICE_AUTO_START,
        StartType::Manual => SERVICE_DEMAND_START,
        StartType::Disabled => SERVICE_DISABLED,
    }
}

const fn run_state(code: u32) -> RunState {
    match code {
        SERVICE_STOPPED => RunState::Stopped,
        SERVICE_RUNNING => RunState::Running,
        SERVICE_PAUSED => RunState::Paused,
        _ => RunState::Pending,
    }
}

impl ScManager {
    fn manager(access: u32) -> std::result::Result<ScHandle, ServiceFault> {
        use windows_sys::Win32::System::Services::OpenSCManagerW;

        // SAFETY: null machine and database names select the local active
        // database.
        let handle = unsafe { OpenSCManagerW(std::ptr::null(), std::ptr::null(), access) };
        if handle.is_null() {
            Err(ServiceFault::ManagerUnavailable(last_error()))
        } else {
            Ok(ScHandle(handle))
        }
    }

    fn service(name: &str, access: u32) -> std::result::Result<ScHandle, ServiceFault> {
        use windows_sys::Win32::System::Services::OpenServiceW;

        let manager = Self::manager(SC_MANAGER_ALL_ACCESS)?;
        let wide = to_wide(name);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe { OpenServiceW(manager.0, wide.as_ptr(), access) };
        if handle.is_null() {
            Err(last_fault())
        } else {
            Ok(ScHandle(handle))
        }
    }

    fn status_of(service: &ScHandle) -> std::result::Result<RunState, ServiceFault> {
        use windows_sys::Win32::System::Services::{QueryServiceStatus, SERVICE_STATUS};

        // SAFETY: SERVICE_STATUS is plain data; all-zero is a valid value.
        let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
        // SAFETY: `status` is a valid out pointer.
        if unsafe { QueryServiceStatus(service.0, &mut status) } == 0 {
            return Err(last_fault());
        }
        Ok(run_state(status.dwCurrentState))
    }
}

impl ServiceManager for ScManager {
    fn open(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        Self::service(name, SERVICE_QUERY_STATUS).map(|_| ())
    }

    fn create(&self, spec: &ServiceSpec) -> std::result::Result<(), ServiceFault> {
        use windows_sys::Win32::System::Services::CreateServiceW;

        let manager = Self::manager(SC_MANAGER_ALL_ACCESS)?;
        let name = to_wide(&spec.name);
        let display = to_wide(&spec.display_name);
        let binary = to_wide(&format!("\"{}\"", spec.binary_path.display()));
        // SAFETY: every string is NUL-terminated and outlives the call; the
        // optional parameters are null.
        let handle = unsafe {
            CreateServiceW(
                manager.0,
                name.as_ptr(),
                display.as_ptr(),
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                start_type_code(spec.start_type),
                SERVICE_ERROR_NORMAL,
                binary.as_ptr(),
                std::ptr::null(),
                std::ptr::null_mut(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        if handle.is_null() {
            return Err(last_fault());
        }
        drop(ScHandle(handle));
        Ok(())
    }

    fn start(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        use windows_sys::Win32::System::Services::StartServiceW;

        let service = Self::service(name, SERVICE_START)?;
        // SAFETY: no arguments are passed.
        if unsafe { StartServiceW(service.0, 0, std::ptr::null()) } == 0 {
            return Err(last_fault());
        }
        Ok(())
    }

    fn stop(&self, name: &str) -> std::result::Result<RunState, ServiceFault> {
        use windows_sys::Win32::System::Services::{ControlService, SERVICE_STATUS};

        let service = Self::service(name, SERVICE_STOP | SERVICE_QUERY_STATUS)?;
        // SAFETY: SERVICE_STATUS is plain data; all-zero is a valid value.
        let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
        // SAFETY: `status` is a valid out pointer.
        if unsafe { ControlService(service.0, SERVICE_CONTROL_STOP, &mut status) } == 0 {
            return Err(last_fault());
        }
        Ok(run_state(status.dwCurrentState))
    }

    fn query(&self, name: &str) -> std::result::Result<RunState, ServiceFault> {
        let service = Self::service(name, SERVICE_QUERY_STATUS)?;
        Self::status_of(&service)
    }

    fn delete(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        use windows_sys::Win32::System::Services::DeleteService;

        let service = Self::service(name, DELETE)?;
        // SAFETY: the handle was opened with DELETE access.
        if unsafe { DeleteService(service.0) } == 0 {
            return Err(last_fault());
        }
        Ok(())
    }

    fn set_start_mode(&self, name: &str, mode: StartType) -> std::result::Result<(), ServiceFault> {
        use windows_sys::Win32::System::Services::ChangeServiceConfigW;

        let service = Self::service(name, SERVICE_CHANGE_CONFIG)?;
        // SAFETY: only the start type changes; every other parameter is
        // SERVICE_NO_CHANGE or null.
        let ok = unsafe {
            ChangeServiceConfigW(
                service.0,
                SERVICE_NO_CHANGE,
                start_type_code(mode),
                SERVICE_NO_CHANGE,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        if ok == 0 {
            return Err(last_fault());
        }
        Ok(())
    }
}

fn os_error(code: u32) -> Error {
    Error::Io(std::io::Error::from_raw_os_error(
        i32::try_from(code).unwrap_or(i32::MAX),
    ))
}
