//! Wire messages and client stub for the `DeviceService` gRPC service.
//!
//! ```text
//! service DeviceService {
//!   rpc GetDeviceInfo (DeviceRequest) returns (DeviceResponse);
//! }
//! message DeviceRequest  { string cpe_id = 1; }
//! message DeviceInfo     { string serial_number = 1; string ip_address = 2;
//!                          string status = 3; string manufacturer = 4; }
//! message DeviceResponse { DeviceInfo device = 1; }
//! ```
//!
//! The schema has no package, so the method path is `/DeviceService/GetDeviceInfo`.

use tonic::transport::Channel;

/// Full method path of `GetDeviceInfo`.
pub const GET_DEVICE_INFO_PATH: &str = "/DeviceService/GetDeviceInfo";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceRequest {
    #[prost(string, tag = "1")]
    pub cpe_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInfo {
    #[prost(string, tag = "1")]
    pub serial_number: String,
    #[prost(string, tag = "2")]
    pub ip_address: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(string, tag = "4")]
    pub manufacturer: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceResponse {
    /// Absent when the service has nothing to report for the device.
    #[prost(message, optional, tag = "1")]
    pub device: Option<DeviceInfo>,
}

impl From<devinfo_core::DeviceRequest> for DeviceRequest {
    fn from(request: devinfo_core::DeviceRequest) -> Self {
        Self {
            cpe_id: request.into_device_id(),
        }
    }
}

impl From<DeviceInfo> for devinfo_core::DeviceInfo {
    fn from(info: DeviceInfo) -> Self {
        Self {
            serial_number: info.serial_number,
            ip_address: info.ip_address,
            status: info.status,
            manufacturer: info.manufacturer,
        }
    }
}

impl From<devinfo_core::DeviceInfo> for DeviceInfo {
    fn from(info: devinfo_core::DeviceInfo) -> Self {
        Self {
            serial_number: info.serial_number,
            ip_address: info.ip_address,
            status: info.status,
            manufacturer: info.manufacturer,
        }
    }
}

/// Unary client for `DeviceService`, bound to a tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct DeviceServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DeviceServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn get_device_info(
        &mut self,
        request: impl tonic::IntoRequest<DeviceRequest>,
    ) -> Result<tonic::Response<DeviceResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service was not ready: {}", e)))?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(GET_DEVICE_INFO_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }
}
