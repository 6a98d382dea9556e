//! The token core: dispatcher, lifecycle state machine and all command
//! handlers.
//!
//! One `Token` owns the whole mutable state (credentials, security
//! environment, key store, scratch buffer) and processes one command at a
//! time. Handlers return `Result<Response, TokenError>`; the dispatcher
//! turns errors into status words. The transport copy of every command is
//! wiped after processing, whatever the outcome, so PIN and key bytes never
//! linger in the command buffer.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::apdu::{ins, Apdu, Response};
use crate::auth::{
    Credential, LifecycleState, PIN_MAX_LENGTH, PIN_MIN_LENGTH, PUK_LENGTH,
};
use crate::chaining::Reconciler;
use crate::crypto::ec::{tag as ec_tag, EcDomainParams, EcPrivateKey, EcdsaSha1Signer};
use crate::crypto::rsa::{RsaCrtKey, RsaCrtKeyBuilder};
use crate::error::TokenError;
use crate::fs::FileSystem;
use crate::keys::{KeySlot, KeyStore};
use crate::se::{alg, SecurityEnvironment};
use crate::tlv;

/// API version reported in the selection record.
pub const API_VERSION_MAJOR: u8 = 0x00;
pub const API_VERSION_MINOR: u8 = 0x04;

/// Issuance-time policy. Serializable so an issuer can keep it alongside
/// the card profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Advertise and use extended-length frames.
    pub ext_apdu_support: bool,
    /// Allow PUT DATA private key import.
    pub private_key_import_allowed: bool,
    /// Forbid setting the PIN before a PUK exists.
    pub puk_must_be_set: bool,
    pub pin_max_tries: u8,
    pub puk_max_tries: u8,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ext_apdu_support: false,
            private_key_import_allowed: false,
            puk_must_be_set: true,
            pin_max_tries: 3,
            puk_max_tries: 5,
        }
    }
}

/// In-flight RSA private key import: the component builder plus the byte
/// count the outer template still owes us.
struct RsaImport {
    builder: RsaCrtKeyBuilder,
    remaining: usize,
}

/// The identity token core.
pub struct Token<F: FileSystem> {
    config: TokenConfig,
    state: LifecycleState,
    pin: Credential,
    puk: Credential,
    fs: F,
    env: SecurityEnvironment,
    keys: KeyStore,
    reconciler: Reconciler,
    ecdsa_ctx: Option<EcdsaSha1Signer>,
    rsa_import: Option<RsaImport>,
}

impl<F: FileSystem> Token<F> {
    pub fn new(config: TokenConfig, fs: F) -> Self {
        let pin = Credential::new(config.pin_max_tries);
        let puk = Credential::new(config.puk_max_tries);
        Self {
            config,
            state: LifecycleState::Creation,
            pin,
            puk,
            fs,
            env: SecurityEnvironment::new(),
            keys: KeyStore::new(),
            reconciler: Reconciler::new(),
            ecdsa_ctx: None,
            rsa_import: None,
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    /// Called by the transport when the token is deselected. Clears both
    /// credentials' session flags and the file-system authentication flag;
    /// try counters persist.
    pub fn deselect(&mut self) {
        self.pin.reset();
        self.puk.reset();
        self.fs.set_authenticated(false);
        self.env.restore();
        self.reconciler.clear();
        self.ecdsa_ctx = None;
        self.rsa_import = None;
    }

    /// Process one command and produce a response.
    ///
    /// The command's data field is zeroed before returning, on every path.
    pub fn process(&mut self, mut cmd: Apdu) -> Response {
        debug!(
            "command: cla={:#04x} ins={:#04x} p1={:#04x} p2={:#04x} lc={}",
            cmd.cla,
            cmd.ins,
            cmd.p1,
            cmd.p2,
            cmd.data.len()
        );
        let result = self.dispatch(&cmd);
        cmd.data.fill(0);
        match result {
            Ok(resp) => resp,
            Err(err) => {
                debug!("command failed: {err}");
                err.into()
            }
        }
    }

    fn dispatch(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if cmd.is_secure_messaging() {
            return Err(TokenError::SecureMessagingNotSupported);
        }

        // Chaining only for PUT DATA, and for PSO / key generation when
        // extended frames are unavailable.
        if cmd.is_chained() {
            let permitted = cmd.ins == ins::PUT_DATA
                || (cmd.ins == ins::PERFORM_SECURITY_OPERATION && !self.config.ext_apdu_support)
                || (cmd.ins == ins::GENERATE_ASYMMETRIC_KEYPAIR && !self.config.ext_apdu_support);
            if !permitted {
                return Err(TokenError::ChainingNotSupported);
            }
        }

        // A different instruction may not cut into an open chain.
        if let Some(open) = self.reconciler.open_chain_ins() {
            if open != cmd.ins {
                return Err(TokenError::CommandNotAllowed);
            }
        }

        if !cmd.is_interindustry() {
            return Err(TokenError::ClaNotSupported);
        }

        match cmd.ins {
            ins::SELECT => self.select(cmd),
            ins::READ_BINARY => {
                let le = cmd.le.unwrap_or(256) as usize;
                let data = self.fs.read(cmd.p1p2(), le)?;
                Ok(Response::success(data))
            }
            ins::VERIFY => self.verify(cmd),
            ins::MANAGE_SECURITY_ENVIRONMENT => self.manage_security_environment(cmd),
            ins::PERFORM_SECURITY_OPERATION => self.perform_security_operation(cmd),
            ins::CREATE_FILE => {
                self.fs.create(&cmd.data)?;
                Ok(Response::ok())
            }
            ins::UPDATE_BINARY => {
                self.fs.update(cmd.p1p2(), &cmd.data)?;
                Ok(Response::ok())
            }
            ins::CHANGE_REFERENCE_DATA => self.change_reference_data(cmd),
            ins::DELETE_FILE => {
                self.fs.delete(&cmd.data)?;
                Ok(Response::ok())
            }
            ins::GENERATE_ASYMMETRIC_KEYPAIR => self.generate_asymmetric_keypair(cmd),
            ins::RESET_RETRY_COUNTER => self.reset_retry_counter(cmd),
            ins::GET_RESPONSE => self.get_response(cmd),
            ins::PUT_DATA => self.put_data(cmd),
            _ => Err(TokenError::InsNotSupported),
        }
    }

    /// SELECT. P1 = 0x04 selects the token application itself and returns
    /// the version record; anything else is a file selection.
    fn select(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if cmd.p1 == 0x04 {
            // Bootstrap trust: before credentials exist the file system is
            // open, afterwards an explicit VERIFY is required.
            let bootstrap = matches!(
                self.state,
                LifecycleState::Creation | LifecycleState::Initialisation
            );
            self.fs.set_authenticated(bootstrap);

            let mut features = 0x00;
            if self.config.ext_apdu_support {
                features |= 0x01;
            }
            return Ok(Response::success(vec![
                API_VERSION_MAJOR,
                API_VERSION_MINOR,
                features,
            ]));
        }
        let data = self.fs.select(cmd.p1, cmd.p2, &cmd.data)?;
        Ok(Response::success(data))
    }

    /// VERIFY: authenticate the user with the PIN.
    ///
    /// An empty payload is a status probe and never touches the counter.
    fn verify(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if cmd.p1 != 0x00 || cmd.p2 != 0x01 {
            return Err(TokenError::IncorrectP1P2);
        }
        let lc = cmd.data.len();
        if lc > 0 && (lc < PIN_MIN_LENGTH || lc > PIN_MAX_LENGTH) {
            return Err(TokenError::WrongLength);
        }

        if lc == 0 {
            return match self.state {
                LifecycleState::Creation | LifecycleState::Initialisation => Ok(Response::ok()),
                _ => Err(TokenError::TriesRemaining(self.pin.tries_remaining())),
            };
        }

        let mut padded = Credential::pad(&cmd.data);
        let matched = self.pin.check(&padded);
        padded.fill(0);
        if matched {
            self.fs.set_authenticated(true);
            Ok(Response::ok())
        } else {
            warn!(
                "PIN verification failed, {} tries remaining",
                self.pin.tries_remaining()
            );
            self.fs.set_authenticated(false);
            Err(TokenError::TriesRemaining(self.pin.tries_remaining()))
        }
    }

    /// CHANGE REFERENCE DATA: set the PUK and PIN during personalization,
    /// or change the PIN later.
    fn change_reference_data(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        let lc = cmd.data.len();
        match self.state {
            LifecycleState::Creation => {
                // P1 = 01: no verification data in this state. P2 selects
                // the credential (02 PUK, 01 PIN).
                if cmd.p1 != 0x01 || (cmd.p2 != 0x02 && cmd.p2 != 0x01) {
                    return Err(TokenError::IncorrectP1P2);
                }
                if cmd.p2 == 0x02 {
                    if lc != PUK_LENGTH {
                        return Err(TokenError::WrongLength);
                    }
                    let mut padded = Credential::pad(&cmd.data);
                    self.puk.update(&padded);
                    padded.fill(0);
                    self.state = LifecycleState::Initialisation;
                    info!("PUK set, lifecycle advanced to initialisation");
                } else {
                    // Setting the PIN right away means no PUK will ever
                    // exist on this token.
                    if self.config.puk_must_be_set {
                        return Err(TokenError::CommandNotAllowed);
                    }
                    if lc < PIN_MIN_LENGTH || lc > PIN_MAX_LENGTH {
                        return Err(TokenError::WrongLength);
                    }
                    let mut padded = Credential::pad(&cmd.data);
                    self.pin.update(&padded);
                    padded.fill(0);
                    self.state = LifecycleState::OperationalActivated;
                    info!("PIN set without PUK, lifecycle advanced to operational");
                }
                Ok(Response::ok())
            }
            LifecycleState::Initialisation => {
                if cmd.p1 != 0x01 || cmd.p2 != 0x01 {
                    return Err(TokenError::IncorrectP1P2);
                }
                if lc < PIN_MIN_LENGTH || lc > PIN_MAX_LENGTH {
                    return Err(TokenError::WrongLength);
                }
                let mut padded = Credential::pad(&cmd.data);
                self.pin.update(&padded);
                padded.fill(0);
                self.state = LifecycleState::OperationalActivated;
                info!("PIN set, lifecycle advanced to operational");
                Ok(Response::ok())
            }
            _ => {
                // Change the PIN: old and new, both already padded so the
                // boundary between them is unambiguous.
                if cmd.p1 != 0x00 || cmd.p2 != 0x01 {
                    return Err(TokenError::IncorrectP1P2);
                }
                if lc != 2 * PIN_MAX_LENGTH {
                    return Err(TokenError::WrongLength);
                }
                let mut old = Credential::pad(&cmd.data[..PIN_MAX_LENGTH]);
                let matched = self.pin.check(&old);
                old.fill(0);
                if !matched {
                    return Err(TokenError::TriesRemaining(self.pin.tries_remaining()));
                }
                let mut new = Credential::pad(&cmd.data[PIN_MAX_LENGTH..]);
                self.pin.update(&new);
                new.fill(0);
                Ok(Response::ok())
            }
        }
    }

    /// RESET RETRY COUNTER: unblock the PIN with the PUK and set a new PIN.
    fn reset_retry_counter(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if self.state != LifecycleState::OperationalActivated {
            return Err(TokenError::CommandNotAllowed);
        }
        let lc = cmd.data.len();
        if lc < PUK_LENGTH + PIN_MIN_LENGTH || lc > PUK_LENGTH + PIN_MAX_LENGTH {
            return Err(TokenError::WrongLength);
        }
        if cmd.p1 != 0x00 || cmd.p2 != 0x01 {
            return Err(TokenError::IncorrectP1P2);
        }

        let mut puk_candidate = Credential::pad(&cmd.data[..PUK_LENGTH]);
        let matched = self.puk.check(&puk_candidate);
        puk_candidate.fill(0);
        if !matched {
            warn!(
                "PUK verification failed, {} tries remaining",
                self.puk.tries_remaining()
            );
            return Err(TokenError::TriesRemaining(self.puk.tries_remaining()));
        }

        let mut new_pin = Credential::pad(&cmd.data[PUK_LENGTH..]);
        self.pin.update(&new_pin);
        new_pin.fill(0);
        info!("PIN unblocked via PUK");
        Ok(Response::ok())
    }

    /// MANAGE SECURITY ENVIRONMENT: SET (P1 = 0x41) and RESTORE (P1 = 0xF3).
    ///
    /// The algorithm/slot pair is committed only after every check passed.
    fn manage_security_environment(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if !self.pin.is_validated() {
            return Err(TokenError::SecurityStatusNotSatisfied);
        }
        if !tlv::is_well_formed(&cmd.data) {
            return Err(TokenError::DataInvalid);
        }

        let (algorithm, key_ref) = match cmd.p1 {
            0x41 => {
                // SET for computation, decipherment, internal auth and key
                // agreement: one algorithm reference, one key reference.
                let alg_val =
                    tlv::read_value(&cmd.data, 0x80).map_err(|_| TokenError::DataInvalid)?;
                if alg_val.len() != 1 {
                    return Err(TokenError::DataInvalid);
                }
                let key_val =
                    tlv::read_value(&cmd.data, 0x84).map_err(|_| TokenError::DataInvalid)?;
                if key_val.len() != 1 || !KeyStore::is_valid_ref(key_val[0] as usize) {
                    return Err(TokenError::DataInvalid);
                }
                (alg_val[0], key_val[0] as usize)
            }
            0xF3 => {
                // RESTORE commits the power-up defaults and is done.
                self.env.restore();
                debug!("security environment restored");
                return Ok(Response::ok());
            }
            // 0x81 (SET for verification and friends), 0xF2 (STORE) and
            // 0xF4 (ERASE) are intentionally not implemented.
            _ => return Err(TokenError::FunctionNotSupported),
        };

        // Usage-specific checks, nothing committed yet. A populated slot
        // must already hold the right key family.
        match cmd.p2 {
            0x00 => {
                // Key generation.
                if algorithm != alg::GEN_EC && algorithm != alg::GEN_RSA_2048 {
                    return Err(TokenError::FunctionNotSupported);
                }
            }
            0xB6 => {
                // Signature.
                if algorithm != alg::RSA_PKCS1 && algorithm != alg::ECDSA_SHA1 {
                    return Err(TokenError::FunctionNotSupported);
                }
                if let Some(slot) = self.keys.get(key_ref) {
                    if !slot.matches_algorithm(algorithm) {
                        return Err(TokenError::DataInvalid);
                    }
                }
            }
            0xB8 => {
                // Decipherment, RSA only.
                if algorithm != alg::RSA_PKCS1 {
                    return Err(TokenError::FunctionNotSupported);
                }
                if let Some(slot) = self.keys.get(key_ref) {
                    if !slot.matches_algorithm(algorithm) {
                        return Err(TokenError::DataInvalid);
                    }
                }
            }
            _ => return Err(TokenError::FunctionNotSupported),
        }

        self.env.algorithm = algorithm;
        self.env.key_ref = Some(key_ref);
        debug!(
            "security environment set: algorithm={:#04x} key_ref={}",
            algorithm, key_ref
        );
        Ok(Response::ok())
    }

    /// GENERATE ASYMMETRIC KEYPAIR for the algorithm selected by MSE.
    fn generate_asymmetric_keypair(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if !self.pin.is_validated() {
            return Err(TokenError::SecurityStatusNotSatisfied);
        }

        match self.env.algorithm {
            alg::GEN_RSA_2048 => {
                if cmd.p1 != 0x42 || cmd.p2 != 0x00 {
                    return Err(TokenError::IncorrectP1P2);
                }
                if !cmd.data.is_empty() {
                    return Err(TokenError::WrongLength);
                }
                // Chaining is for the EC parameter upload, never for RSA.
                if cmd.is_chained() {
                    return Err(TokenError::ChainingNotSupported);
                }
                let slot = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;

                let (key, modulus, exponent) = RsaCrtKey::generate()?;
                self.keys.set(slot, KeySlot::RsaCrt(key));
                info!("RSA key pair generated in slot {slot}");
                self.send_rsa_public_key(cmd.le, &modulus, &exponent)
            }
            alg::GEN_EC => {
                if cmd.p1 != 0x00 || cmd.p2 != 0x00 {
                    return Err(TokenError::IncorrectP1P2);
                }
                if cmd.is_chained() {
                    self.reconciler.push_chain_segment(cmd.ins, &cmd.data)?;
                    return Ok(Response::ok());
                }
                let total = self.reconciler.finish_chain(&cmd.data)?;
                let parsed = EcDomainParams::parse(self.reconciler.data(total));
                self.reconciler.abort_chain();
                let params = parsed?;

                let slot = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;
                let key = EcPrivateKey::generate(params.clone())?;
                let point = key.encoded_public_point()?;
                self.keys.set(slot, KeySlot::Ec(key));
                info!(
                    "EC key pair generated in slot {slot} ({}-bit field)",
                    params.field_bits()
                );
                self.send_ec_public_key(&params, &point)
            }
            _ => Err(TokenError::ConditionsNotSatisfied),
        }
    }

    /// Send the RSA public key envelope (0x7F49 wrapping modulus and
    /// exponent), staging the tail for GET RESPONSE on short transports.
    fn send_rsa_public_key(
        &mut self,
        le: Option<u32>,
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<Response, TokenError> {
        // 7F49 / 265 bytes, then 81 / 256 bytes of modulus.
        let header: [u8; 9] = [0x7F, 0x49, 0x82, 0x01, 0x09, 0x81, 0x82, 0x01, 0x00];

        if self.config.ext_apdu_support {
            let mut out = Vec::with_capacity(270);
            out.extend_from_slice(&header);
            out.extend_from_slice(modulus);
            out.push(0x82);
            out.push(exponent.len() as u8);
            out.extend_from_slice(exponent);
            return Ok(Response::success(out));
        }

        // Short transport: 256 bytes now, the rest via GET RESPONSE.
        if self.reconciler.staged_len() > 0 {
            return Err(TokenError::ConditionsNotSatisfied);
        }
        if le != Some(256) {
            return Err(TokenError::WrongExpectedLength(0));
        }

        let mut first = Vec::with_capacity(256);
        first.extend_from_slice(&header);
        first.extend_from_slice(&modulus[..247]);

        let mut tail = Vec::with_capacity(14);
        tail.extend_from_slice(&modulus[247..]);
        tail.push(0x82);
        tail.push(exponent.len() as u8);
        tail.extend_from_slice(exponent);
        let remaining = tail.len() as u8;
        self.reconciler.stage_response(&tail)?;

        Ok(Response::more_data(first, remaining))
    }

    /// Send the EC public key envelope: domain parameters plus the public
    /// point, deferring the point when it cannot fit a short frame.
    fn send_ec_public_key(
        &mut self,
        params: &EcDomainParams,
        point: &[u8],
    ) -> Result<Response, TokenError> {
        let params_part = params.encode();
        let point_entry = tlv::encode(ec_tag::PUBLIC_POINT, point);

        let mut out = vec![0x7F, 0x49];
        out.extend(tlv::encode_length(params_part.len() + point_entry.len()));
        out.extend_from_slice(&params_part);

        if self.config.ext_apdu_support || params.field_bits() <= 192 {
            out.extend_from_slice(&point_entry);
            return Ok(Response::success(out));
        }

        // The envelope exceeds a short frame; the point entry goes to the
        // staging buffer.
        if self.reconciler.staged_len() > 0 {
            return Err(TokenError::ConditionsNotSatisfied);
        }
        let remaining = point_entry.len() as u8;
        self.reconciler.stage_response(&point_entry)?;
        Ok(Response::more_data(out, remaining))
    }

    /// PERFORM SECURITY OPERATION: signature (P1P2 = 9E9A) or decipher
    /// (P1P2 = 8086).
    fn perform_security_operation(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if !self.pin.is_validated() {
            return Err(TokenError::SecurityStatusNotSatisfied);
        }
        match cmd.p1p2() {
            0x9E9A => self.compute_signature(cmd),
            0x8086 => self.decipher(cmd),
            _ => Err(TokenError::IncorrectP1P2),
        }
    }

    fn compute_signature(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        let key_ref = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;
        match self.env.algorithm {
            alg::RSA_PKCS1 => {
                // The payload is a DigestInfo; it is padded and signed in
                // one shot.
                if cmd.is_chained() {
                    return Err(TokenError::ChainingNotSupported);
                }
                if cmd.data.len() > 247 {
                    return Err(TokenError::WrongLength);
                }
                let key = match self.keys.get(key_ref) {
                    Some(KeySlot::RsaCrt(key)) => key,
                    _ => return Err(TokenError::ConditionsNotSatisfied),
                };
                let sig = key.sign_pkcs1(&cmd.data)?;
                Ok(Response::success(sig))
            }
            alg::ECDSA_SHA1 => {
                // The first frame of a sequence initializes the signer;
                // every frame feeds the running digest; the final
                // non-chained frame produces the signature.
                if self.ecdsa_ctx.is_none() {
                    let key = match self.keys.get(key_ref) {
                        Some(KeySlot::Ec(key)) => key.clone(),
                        _ => return Err(TokenError::ConditionsNotSatisfied),
                    };
                    self.ecdsa_ctx = Some(EcdsaSha1Signer::new(key));
                }
                if let Some(ctx) = self.ecdsa_ctx.as_mut() {
                    ctx.update(&cmd.data);
                }

                if cmd.is_chained() {
                    self.reconciler.note_chain(cmd.ins);
                    Ok(Response::ok())
                } else {
                    self.reconciler.close_chain();
                    let ctx = self.ecdsa_ctx.take().ok_or(TokenError::CryptoFailed)?;
                    let sig = ctx.sign()?;
                    Ok(Response::success(sig))
                }
            }
            _ => Err(TokenError::ConditionsNotSatisfied),
        }
    }

    fn decipher(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        // The first byte of the logical payload is the padding indicator
        // and must read "no further indication".
        let ciphertext: Vec<u8> = if self.config.ext_apdu_support {
            if cmd.data.first() != Some(&0x00) {
                return Err(TokenError::WrongData);
            }
            cmd.data[1..].to_vec()
        } else if cmd.is_chained() {
            // First segment of the fixed two-frame chain.
            if cmd.data.first() != Some(&0x00) {
                return Err(TokenError::WrongData);
            }
            self.reconciler.abort_chain();
            self.reconciler.push_chain_segment(cmd.ins, &cmd.data[1..])?;
            return Ok(Response::ok());
        } else {
            let total = self.reconciler.finish_chain(&cmd.data)?;
            let ct = self.reconciler.data(total).to_vec();
            self.reconciler.abort_chain();
            ct
        };

        match self.env.algorithm {
            alg::RSA_PKCS1 => {
                let key_ref = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;
                let key = match self.keys.get(key_ref) {
                    Some(KeySlot::RsaCrt(key)) => key,
                    _ => return Err(TokenError::ConditionsNotSatisfied),
                };
                if ciphertext.len() != key.modulus_len() {
                    return Err(TokenError::WrongLength);
                }
                let plain = key.decrypt_pkcs1(&ciphertext)?;
                Ok(Response::success(plain))
            }
            _ => Err(TokenError::FunctionNotSupported),
        }
    }

    /// PUT DATA: private key import (P1P2 = 3FFF), policy-gated.
    fn put_data(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if !self.pin.is_validated() {
            return Err(TokenError::SecurityStatusNotSatisfied);
        }
        if cmd.p1 != 0x3F || cmd.p2 != 0xFF {
            return Err(TokenError::IncorrectP1P2);
        }
        if !self.config.private_key_import_allowed {
            return Err(TokenError::CommandNotAllowed);
        }
        match self.env.algorithm {
            alg::GEN_RSA_2048 => self.import_rsa_key(cmd),
            alg::GEN_EC => self.import_ec_key(cmd),
            _ => Err(TokenError::ConditionsNotSatisfied),
        }
    }

    /// RSA import: a chained upload where the first frame carries the outer
    /// 0x7F48 template and every frame holds exactly one CRT component.
    /// Components are consumed segment by segment; the transport copy is
    /// wiped by `process` right after.
    fn import_rsa_key(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if cmd.is_chained() {
            if self.rsa_import.is_none() {
                // First frame: outer private-key template.
                if cmd.data.len() < 3 || cmd.data[0] != 0x7F || cmd.data[1] != 0x48 {
                    return Err(TokenError::DataInvalid);
                }
                let total =
                    tlv::decode_length(&cmd.data, 2).map_err(|_| TokenError::DataInvalid)?;
                let content_start = 2 + tlv::length_field_width(total);
                let content = cmd
                    .data
                    .get(content_start..)
                    .ok_or(TokenError::DataInvalid)?;
                if content.len() > total {
                    return Err(TokenError::DataInvalid);
                }

                let mut import = RsaImport {
                    builder: RsaCrtKeyBuilder::new(),
                    remaining: total - content.len(),
                };
                Self::consume_rsa_component(&mut import.builder, content)?;
                self.rsa_import = Some(import);
                self.reconciler.note_chain(cmd.ins);
            } else {
                let overrun = match self.rsa_import.as_ref() {
                    Some(import) => cmd.data.len() > import.remaining,
                    None => return Err(TokenError::DataInvalid),
                };
                if overrun {
                    self.rsa_import = None;
                    self.reconciler.close_chain();
                    return Err(TokenError::DataInvalid);
                }
                let import = self.rsa_import.as_mut().ok_or(TokenError::DataInvalid)?;
                import.remaining -= cmd.data.len();
                Self::consume_rsa_component(&mut import.builder, &cmd.data)?;
            }
            Ok(Response::ok())
        } else {
            // Final frame: last component, then the key must be whole.
            let mut import = self.rsa_import.take().ok_or(TokenError::DataInvalid)?;
            self.reconciler.close_chain();
            if import.remaining != cmd.data.len() {
                return Err(TokenError::DataInvalid);
            }
            Self::consume_rsa_component(&mut import.builder, &cmd.data)?;
            if !import.builder.is_complete() {
                // Discard the partial key entirely.
                return Err(TokenError::WrongData);
            }
            let slot = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;
            let key = import.builder.build()?;
            self.keys.set(slot, KeySlot::RsaCrt(key));
            info!("RSA private key imported into slot {slot}");
            Ok(Response::ok())
        }
    }

    /// Feed one TLV-encoded CRT component into the builder.
    fn consume_rsa_component(
        builder: &mut RsaCrtKeyBuilder,
        chunk: &[u8],
    ) -> Result<(), TokenError> {
        if chunk.is_empty() || !tlv::is_well_formed(chunk) {
            return Err(TokenError::DataInvalid);
        }
        let tag = chunk[0];
        let value = tlv::read_value(chunk, tag).map_err(|_| TokenError::DataInvalid)?;
        builder.set_component(tag, value)
    }

    /// EC import: the whole payload is reassembled first, then validated as
    /// one block (0xE0 wrapper holding domain parameters plus the private
    /// scalar) and installed atomically.
    fn import_ec_key(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        if cmd.is_chained() {
            self.reconciler.push_chain_segment(cmd.ins, &cmd.data)?;
            return Ok(Response::ok());
        }
        let total = self.reconciler.finish_chain(&cmd.data)?;
        let mut blob = self.reconciler.data(total).to_vec();
        self.reconciler.abort_chain();

        let outcome = Self::parse_ec_import(&blob);
        blob.fill(0);
        let key = outcome?;

        let slot = self.env.key_ref.ok_or(TokenError::ConditionsNotSatisfied)?;
        self.keys.set(slot, KeySlot::Ec(key));
        info!("EC private key imported into slot {slot}");
        Ok(Response::ok())
    }

    fn parse_ec_import(blob: &[u8]) -> Result<EcPrivateKey, TokenError> {
        if blob.first() != Some(&0xE0) {
            return Err(TokenError::WrongData);
        }
        let len = tlv::decode_length(blob, 1).map_err(|_| TokenError::DataInvalid)?;
        let start = 1 + tlv::length_field_width(len);
        let inner = blob.get(start..).ok_or(TokenError::DataInvalid)?;
        if inner.len() != len || !tlv::is_well_formed(inner) {
            return Err(TokenError::DataInvalid);
        }

        let params = EcDomainParams::parse(inner)?;
        let scalar =
            tlv::read_value(inner, ec_tag::PRIVATE_SCALAR).map_err(|_| TokenError::DataInvalid)?;
        EcPrivateKey::from_scalar(params, scalar)
    }

    /// GET RESPONSE: drain the staged response fragment.
    fn get_response(&mut self, cmd: &Apdu) -> Result<Response, TokenError> {
        let le = cmd.le.unwrap_or(0);
        let data = self.reconciler.take_response(le)?;
        Ok(Response::success(data))
    }
}
