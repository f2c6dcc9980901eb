use crate::prelude::*;
use crate::retransmission::RttEstimator;
use crate::send_recv_utils::*;
use crate::tcp_utils::*;
use crate::utils::*;

pub const INITIAL_SSTHRESH: u32 = 65535;
pub const INITIAL_CWND: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
}

/// Point-in-time copy of a connection's bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ConnInfo {
    pub local: TcpAddress,
    pub remote: TcpAddress,
    pub state: TcpState,
    pub seq_num: u32,
    pub ack_num: u32,
    pub window_size: u16,
    pub remote_window: u16,
    pub mss: usize,
    pub ssthresh: u32,
    pub cwnd: u32,
    pub congestion_control: CongestionControl,
    pub rtt: Duration,
    pub rto: Duration,
    pub send_buffer_used: usize,
    pub send_buffer_size: usize,
    pub recv_buffer_used: usize,
    pub recv_buffer_size: usize,
    pub stats: ConnStats,
}

/// One end of a TCP connection. Owns its buffers; segments leave through the outbound queue.
#[derive(Debug)]
pub struct TcpConnection {
    local: TcpAddress,
    remote: TcpAddress,
    state: TcpState,
    iss: u32,
    seq_num: u32, // next sequence number to send
    ack_num: u32, // next sequence number expected from the peer
    ssthresh: u32,
    cwnd: u32,
    congestion_control: CongestionControl,
    mss: usize, // payload limit per segment, from the egress MTU
    send_buf: SendBuf,
    recv_buf: RecvBuf,
    rtt: RttEstimator,
    fin_pending: bool,
    fin_seq: Option<u32>, // sequence number of our FIN once sent
    fin_acked: bool,
    stats: ConnStats,
    ip_sender: Sender<PacketBasis>,
}

impl TcpConnection {
    pub fn new(
        local: TcpAddress,
        remote: TcpAddress,
        congestion_control: CongestionControl,
        ip_sender: Sender<PacketBasis>,
    ) -> TcpConnection {
        let iss = timestamp() as u32;
        let mut send_buf = SendBuf::new();
        send_buf.set_init_seq(iss);
        TcpConnection {
            local,
            remote,
            state: TcpState::Closed,
            iss,
            seq_num: iss,
            ack_num: 0,
            ssthresh: INITIAL_SSTHRESH,
            cwnd: INITIAL_CWND,
            congestion_control,
            mss: MSS,
            send_buf,
            recv_buf: RecvBuf::new(),
            rtt: RttEstimator::new(),
            fin_pending: false,
            fin_seq: None,
            fin_acked: false,
            stats: ConnStats::default(),
            ip_sender,
        }
    }

    //
    //OPENING
    //

    /// Active open: sends SYN and moves to SYN_SENT
    pub fn first_syn(&mut self) -> Result<()> {
        self.build_and_send(Vec::new(), SYN)?;
        self.state = TcpState::SynSent;
        Ok(())
    }
    /// Passive open from a listener: records the peer's SYN, answers SYN|ACK, moves to SYN_RECEIVED
    pub fn first_syn_ack(&mut self, syn: &TcpPacket) -> Result<()> {
        self.recv_buf.set_init_seq(syn.header.sequence_number);
        self.ack_num = self.recv_buf.expected_seq();
        self.send_buf.update_window(syn.header.window_size);
        self.build_and_send(Vec::new(), SYN | ACK)?;
        self.state = TcpState::SynReceived;
        Ok(())
    }

    //
    //HANDLING INCOMING PACKETS
    //

    pub fn handle_packet(&mut self, tpack: &TcpPacket) -> Result<()> {
        self.stats.packets_received += 1;
        if tpack.header.rst {
            if !self.rst_acceptable(&tpack.header) {
                debug!("{} <- {}: ignoring reset outside the window", self.local, self.remote);
                return Ok(());
            }
            warn!("{} <- {}: connection reset by peer", self.local, self.remote);
            self.state = TcpState::Closed;
            return Ok(());
        }
        let new_state = match self.state {
            TcpState::SynSent => self.process_syn_ack(tpack)?,
            TcpState::SynReceived => self.process_ack(tpack)?,
            TcpState::Closed | TcpState::Listen => {
                trace!("{} ignoring segment in {}", self.local, self.state);
                self.state
            }
            _ => self.established_handle(tpack)?,
        };
        if new_state != self.state {
            debug!("{} -> {}: {} -> {}", self.local, self.remote, self.state, new_state);
            self.state = new_state;
        }
        Ok(())
    }
    /// A reset counts only when it acknowledges our SYN (SYN_SENT) or falls inside the receive window
    fn rst_acceptable(&self, head: &TcpHeader) -> bool {
        match self.state {
            TcpState::SynSent => head.ack && head.acknowledgment_number == self.iss.wrapping_add(1),
            _ => {
                let offset = head.sequence_number.wrapping_sub(self.ack_num) as usize;
                offset < cmp::max(self.recv_buf.window() as usize, 1)
            }
        }
    }
    fn process_syn_ack(&mut self, tpack: &TcpPacket) -> Result<TcpState> {
        let head = &tpack.header;
        if !has_only_flags(head, SYN | ACK) || head.acknowledgment_number != self.iss.wrapping_add(1) {
            return Ok(TcpState::SynSent);
        }
        self.recv_buf.set_init_seq(head.sequence_number);
        self.ack_num = self.recv_buf.expected_seq();
        self.send_buf.update_window(head.window_size);
        self.build_and_send(Vec::new(), ACK)?;
        info!("{} -> {}: handshake complete", self.local, self.remote);
        Ok(TcpState::Established)
    }
    fn process_ack(&mut self, tpack: &TcpPacket) -> Result<TcpState> {
        let head = &tpack.header;
        if is_syn(head) {
            // our SYN|ACK went missing
            self.seq_num = self.iss;
            self.build_and_send(Vec::new(), SYN | ACK)?;
            return Ok(TcpState::SynReceived);
        }
        if !head.ack || head.acknowledgment_number != self.iss.wrapping_add(1) {
            return Ok(TcpState::SynReceived);
        }
        self.send_buf.update_window(head.window_size);
        self.state = TcpState::Established;
        info!("{} <- {}: handshake complete", self.local, self.remote);
        if !tpack.payload.is_empty() || head.fin {
            return self.established_handle(tpack);
        }
        Ok(TcpState::Established)
    }
    fn established_handle(&mut self, tpack: &TcpPacket) -> Result<TcpState> {
        let head = &tpack.header;
        let mut state = self.state;
        let mut need_ack = false;

        if head.ack {
            let ack = head.acknowledgment_number;
            let released = self.send_buf.ack_data(ack);
            if released > 0 {
                self.rtt.on_ack(ack);
            }
            self.send_buf.update_window(head.window_size);
            if let Some(fin_seq) = self.fin_seq {
                if !self.fin_acked && ack == fin_seq.wrapping_add(1) {
                    self.fin_acked = true;
                    state = match state {
                        TcpState::FinWait1 => TcpState::FinWait2,
                        TcpState::Closing => TcpState::TimeWait,
                        TcpState::LastAck => TcpState::Closed,
                        other => other,
                    };
                }
            }
        }

        if !tpack.payload.is_empty() {
            if matches!(state, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2) {
                let before = self.recv_buf.used();
                self.ack_num = self.recv_buf.add(head.sequence_number, &tpack.payload);
                self.stats.bytes_received += (self.recv_buf.used() - before) as u64;
            }
            need_ack = true;
        }

        if head.fin {
            self.recv_buf
                .set_fin(head.sequence_number.wrapping_add(tpack.payload.len() as u32));
            if self.recv_buf.take_fin() {
                self.ack_num = self.recv_buf.expected_seq();
                state = match state {
                    TcpState::Established => TcpState::CloseWait,
                    TcpState::FinWait1 if self.fin_acked => TcpState::TimeWait,
                    TcpState::FinWait1 => TcpState::Closing,
                    TcpState::FinWait2 => TcpState::TimeWait,
                    other => other,
                };
            }
            need_ack = true;
        }

        if need_ack {
            self.build_and_send(Vec::new(), ACK)?;
        }
        self.transmit_pending()?;
        Ok(state)
    }

    //
    //APPLICATION CALLS
    //

    /// Queues all of `data` (or none of it) and transmits what the peer's window allows.
    /// Only an ESTABLISHED connection takes data.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != TcpState::Established || self.fin_pending {
            return Err(NetError::state(format!("cannot send in {}", self.state)));
        }
        let queued = self.send_buf.fill(data)?;
        self.transmit_pending()?;
        Ok(queued)
    }
    /// Copies up to `buf.len()` received bytes; 0 when nothing is buffered.
    /// Only an ESTABLISHED connection can be read.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != TcpState::Established {
            return Err(NetError::state(format!("cannot receive in {}", self.state)));
        }
        let advertised = self.recv_buf.window();
        let read = self.recv_buf.read(buf);
        // reopen a window the peer may have stopped on
        if read > 0 && (advertised as usize) < self.mss {
            self.build_and_send(Vec::new(), ACK)?;
        }
        Ok(read)
    }
    /// Half-closes the connection: FIN goes out after the queued data
    pub fn shutdown_write(&mut self) -> Result<()> {
        let next = match self.state {
            TcpState::Established => TcpState::FinWait1,
            TcpState::CloseWait => TcpState::LastAck,
            other => return Err(NetError::state(format!("cannot shut down writing in {other}"))),
        };
        self.fin_pending = true;
        debug!("{} -> {}: {} -> {}", self.local, self.remote, self.state, next);
        self.state = next;
        self.transmit_pending()?;
        Ok(())
    }
    pub fn set_congestion_control(&mut self, algorithm: CongestionControl) {
        self.congestion_control = algorithm;
    }
    /// Limits segment payloads, e.g. to `mss_for_mtu` of the egress interface
    pub fn set_mss(&mut self, mss: usize) {
        self.mss = mss.clamp(1, MSS);
    }

    //
    //BUILDING AND SENDING PACKETS
    //

    /// Sends as much queued data as the peer's window allows, then the FIN if one is due.
    /// Returns the number of segments sent.
    pub fn transmit_pending(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Some(data) = self.send_buf.next_data(self.mss) {
            let end = self.seq_num.wrapping_add(data.len() as u32);
            self.rtt.start_sample(end);
            self.build_and_send(data, ACK | PSH)?;
            sent += 1;
        }
        if self.fin_pending && self.fin_seq.is_none() && self.send_buf.unsent() == 0 {
            self.fin_seq = Some(self.seq_num);
            self.build_and_send(Vec::new(), FIN | ACK)?;
            sent += 1;
        }
        Ok(sent)
    }
    fn build_and_send(&mut self, payload: Vec<u8>, flags: u8) -> Result<()> {
        let payload_len = payload.len();
        let new_pack = self.build_packet(payload, flags)?;
        let pbasis = self.packet_basis(&new_pack);
        let increment_seq = match payload_len {
            0 if flags & (SYN | FIN) != 0 => 1,
            n => n as u32,
        };
        queue_outbound(&self.ip_sender, pbasis)?;
        self.seq_num = self.seq_num.wrapping_add(increment_seq);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload_len as u64;
        Ok(())
    }
    fn build_packet(&self, payload: Vec<u8>, flags: u8) -> Result<TcpPacket> {
        let mut tcp_header = TcpHeader::new(self.local.port, self.remote.port, self.seq_num, self.recv_buf.window());
        if flags & ACK != 0 {
            tcp_header.acknowledgment_number = self.ack_num;
        }
        set_flags(&mut tcp_header, flags);
        tcp_header.checksum = tcp_header
            .calc_checksum_ipv4_raw(self.local.ip.octets(), self.remote.ip.octets(), &payload)
            .map_err(|e| NetError::invalid(format!("segment too large: {e}")))?;
        Ok(TcpPacket::new(tcp_header, payload))
    }
    /// Takes in a TCP packet and outputs a Packet Basis for its IP packet
    fn packet_basis(&self, tpack: &TcpPacket) -> PacketBasis {
        PacketBasis {
            src_ip: self.local.ip,
            dst_ip: self.remote.ip,
            protocol: IpNumber::TCP,
            msg: serialize_tcp(tpack),
        }
    }

    //
    //GETTERS
    //

    pub fn local(&self) -> TcpAddress {
        self.local
    }
    pub fn remote(&self) -> TcpAddress {
        self.remote
    }
    pub fn state(&self) -> TcpState {
        self.state
    }
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }
    pub fn ack_num(&self) -> u32 {
        self.ack_num
    }
    pub fn window_size(&self) -> u16 {
        self.recv_buf.window()
    }
    pub fn remote_window(&self) -> u16 {
        self.send_buf.remote_window()
    }
    pub fn mss(&self) -> usize {
        self.mss
    }
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }
    pub fn congestion_control(&self) -> CongestionControl {
        self.congestion_control
    }
    pub fn send_buffer_used(&self) -> usize {
        self.send_buf.used()
    }
    pub fn recv_buffer_used(&self) -> usize {
        self.recv_buf.used()
    }
    pub fn stats(&self) -> &ConnStats {
        &self.stats
    }
    pub fn info(&self) -> ConnInfo {
        ConnInfo {
            local: self.local,
            remote: self.remote,
            state: self.state,
            seq_num: self.seq_num,
            ack_num: self.ack_num,
            window_size: self.recv_buf.window(),
            remote_window: self.send_buf.remote_window(),
            mss: self.mss,
            ssthresh: self.ssthresh,
            cwnd: self.cwnd,
            congestion_control: self.congestion_control,
            rtt: self.rtt.srtt(),
            rto: self.rtt.rto(),
            send_buffer_used: self.send_buf.used(),
            send_buffer_size: self.send_buf.capacity(),
            recv_buffer_used: self.recv_buf.used(),
            recv_buffer_size: self.recv_buf.capacity(),
            stats: self.stats.clone(),
        }
    }
}
