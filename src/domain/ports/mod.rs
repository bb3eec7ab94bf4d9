mod image_loader_port;
mod image_transport_port;

pub use image_loader_port::ImageLoaderPort;
pub use image_transport_port::ImageTransport;
