use std::net::SocketAddr;

const LISTEN_BACKLOG: u32 = 1024;

#[inline]
pub fn new_tcp_socket(
    bind_interface: Option<&str>,
    is_ipv6: bool,
) -> std::io::Result<tokio::net::TcpSocket> {
    let tcp_socket = if is_ipv6 {
        tokio::net::TcpSocket::new_v6()?
    } else {
        tokio::net::TcpSocket::new_v4()?
    };

    if let Some(_b) = bind_interface {
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        tcp_socket.bind_device(Some(_b.as_bytes()))?;

        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "binding to an interface is not supported on this platform",
        ));
    }

    Ok(tcp_socket)
}

pub fn new_tcp_listener(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let tcp_socket = new_tcp_socket(None, addr.is_ipv6())?;
    tcp_socket.set_reuseaddr(true)?;
    tcp_socket.bind(addr)?;
    tcp_socket.listen(LISTEN_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let listener = new_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        accepted.unwrap();
        connected.unwrap();
    }
}
