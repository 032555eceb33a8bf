//! Fetching groups and tables into the cache and validating them.

use crate::{
    hooks::{LoadRequest, OverlayHooks},
    tables::OverlayTables,
    token::OverlayToken,
    utils, Error, Result,
};

/// Builds the load request for `token`'s group.
///
/// Returns the request together with the group size in units. The
/// destination is left at 0 until a block has been allocated.
///
/// # Errors
///
/// Returns [`Error::Internal`] when the group is missing from the offset table.
pub(crate) fn group_request(
    tables: &OverlayTables<'_>,
    token: OverlayToken,
    min_group_size: u32,
    max_group_units: u32,
) -> Result<(LoadRequest, usize)> {
    let group = token.group_id();
    let (Some(offset), Some(units)) = (tables.group_offset_units(group), tables.group_units(group))
    else {
        return Err(internal_error!("group {} of {} is not in the offset table", group, token));
    };
    if u32::from(units) > max_group_units {
        return Err(internal_error!(
            "group {} spans {} units, more than the maximum group size",
            group,
            units
        ));
    }

    let request = LoadRequest {
        group_offset: u32::from(offset) * min_group_size,
        size: u32::from(units) * min_group_size,
        destination: 0,
    };
    Ok((request, usize::from(units)))
}

/// Loads `request` into the cache memory and validates it.
///
/// `window_base` is the address of `memory[0]`. The CRC trailer, when
/// enabled, sits in the last four bytes of the loaded image.
///
/// # Errors
///
/// - [`Error::LoadFailed`] when the fetch hook fails
/// - [`Error::CrcMismatch`] when the checksum does not match
pub(crate) fn fetch<H: OverlayHooks + ?Sized>(
    hooks: &H,
    memory: &mut [u8],
    window_base: u32,
    request: &LoadRequest,
    crc: bool,
    token: OverlayToken,
) -> Result<()> {
    let start = request.destination.wrapping_sub(window_base) as usize;
    let Some(destination) = memory.get_mut(start..start + request.size as usize) else {
        return Err(internal_error!(
            "load of {} to 0x{:08x} falls outside the cache window",
            token,
            request.destination
        ));
    };

    log::debug!(
        "loading {} ({} bytes from 0x{:x}) to 0x{:08x}",
        token,
        request.size,
        request.group_offset,
        request.destination
    );
    hooks
        .load_group(request, destination)
        .map_err(|source| Error::LoadFailed { token, source })?;

    if crc {
        let valid = utils::split_trailer(destination)
            .is_some_and(|(payload, expected)| hooks.crc_matches(payload, expected));
        if !valid {
            log::warn!("CRC mismatch for {}", token);
            return Err(Error::CrcMismatch { token });
        }
    }

    hooks.invalidate_data_cache(request.destination, request.size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{ImageBuilder, RecordingHooks};

    #[test]
    fn test_group_request() {
        let image = ImageBuilder::new(512).group(1, 1).group(2, 3).build();
        let tables = OverlayTables::new(&image[..512], None);

        let (request, units) =
            group_request(&tables, OverlayToken::from_parts(2, 5, 0, false), 512, 8).unwrap();
        assert_eq!(units, 3);
        assert_eq!(request.group_offset, 1024);
        assert_eq!(request.size, 1536);

        assert!(group_request(&tables, OverlayToken::from_parts(2, 0, 0, false), 512, 2).is_err());
        assert!(group_request(&tables, OverlayToken::from_parts(9, 0, 0, false), 512, 8).is_err());
    }

    #[test]
    fn test_fetch_with_crc() {
        let image = ImageBuilder::new(512).crc(true).group(1, 1).build();
        let hooks = RecordingHooks::new(image.clone());
        let mut memory = vec![0u8; 1024];
        let request = LoadRequest {
            group_offset: 512,
            size: 512,
            destination: 0x1000_0200,
        };
        let token = OverlayToken::from_parts(1, 0, 0, false);

        fetch(&hooks, &mut memory, 0x1000_0000, &request, true, token).unwrap();
        assert_eq!(&memory[512..], &image[512..1024]);
        assert_eq!(hooks.invalidations(), vec![(0x1000_0200, 512)]);

        hooks.corrupt_offset(512);
        let err = fetch(&hooks, &mut memory, 0x1000_0000, &request, true, token).unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { token: t } if t == token));
    }

    #[test]
    fn test_fetch_failure_and_bounds() {
        let hooks = RecordingHooks::new(vec![0u8; 512]);
        let mut memory = vec![0u8; 1024];
        let token = OverlayToken::from_parts(1, 0, 0, false);
        let past_end = LoadRequest {
            group_offset: 0,
            size: 512,
            destination: 0x400,
        };
        assert!(matches!(
            fetch(&hooks, &mut memory, 0, &past_end, false, token),
            Err(Error::Internal { .. })
        ));

        let missing = LoadRequest {
            group_offset: 4096,
            size: 512,
            destination: 0,
        };
        assert!(matches!(
            fetch(&hooks, &mut memory, 0, &missing, false, token),
            Err(Error::LoadFailed { .. })
        ));
    }
}
